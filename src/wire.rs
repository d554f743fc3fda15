//! Newline-delimited JSON protocol. One request object per line, one reply
//! line per request; a connection that sends `listen` also receives
//! `{"event": ...}` lines as transitions commit.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, warn};

use crate::engine::{BookingRequest, Engine, EngineError, TransitionContext};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;
use crate::store::Filter;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Create {
        actor: Actor,
        booking: NewBooking,
    },
    Get {
        id: BookingRef,
    },
    List {
        #[serde(default)]
        filter: Filter,
    },
    Availability {
        booking_type: String,
        date: NaiveDate,
        /// Evaluate the whole stay `[date, check_out]` instead of one day.
        #[serde(default)]
        check_out: Option<NaiveDate>,
        #[serde(default)]
        exclude: Option<BookingRef>,
    },
    Transition {
        id: BookingRef,
        to: Status,
        context: TransitionContext,
    },
    Cancel {
        id: BookingRef,
        actor: Actor,
        #[serde(default)]
        reason: Option<String>,
    },
    CheckIn {
        id: BookingRef,
        actor: Actor,
        #[serde(default)]
        bond_collected: bool,
    },
    CheckOut {
        id: BookingRef,
        actor: Actor,
        #[serde(default)]
        overtime_charge: Amount,
        #[serde(default)]
        damage_charge: Amount,
        #[serde(default)]
        bond_returned: bool,
    },
    NoShow {
        id: BookingRef,
        actor: Actor,
    },
    RestartHold {
        id: BookingRef,
        actor: Actor,
    },
    RecordPayment {
        id: BookingRef,
        kind: PaymentKind,
        proof_ref: String,
        actor: Actor,
    },
    VerifyPayment {
        id: BookingRef,
        kind: PaymentKind,
        actor: Actor,
    },
    CanRebook {
        id: BookingRef,
    },
    RequestRebooking {
        id: BookingRef,
        new_check_in: NaiveDate,
        reason: String,
        actor: Actor,
    },
    DecideRebooking {
        id: BookingRef,
        approve: bool,
        actor: Actor,
        #[serde(default)]
        note: Option<String>,
    },
    Note {
        id: BookingRef,
        actor: Actor,
        note: String,
    },
    /// Stream transitions for one reservation, or for all when `id` is absent.
    Listen {
        #[serde(default)]
        id: Option<BookingRef>,
    },
    Unlisten,
}

/// `create` payload as sent. The booking type stays a raw key until
/// dispatch so an unrecognised one is reported as `unknown_booking_type`.
#[derive(Debug, Deserialize)]
pub struct NewBooking {
    pub guest: GuestInfo,
    pub booking_type: String,
    pub check_in_date: NaiveDate,
    pub duration: u32,
}

impl NewBooking {
    fn into_request(self) -> Result<BookingRequest, EngineError> {
        Ok(BookingRequest {
            guest: self.guest,
            booking_type: self.booking_type.parse()?,
            check_in_date: self.check_in_date,
            duration: self.duration,
        })
    }
}

struct Subscription {
    id: Option<BookingRef>,
    rx: broadcast::Receiver<TransitionEvent>,
}

fn unsubscribe(engine: &Engine, sub: Option<Subscription>) {
    if let Some(Subscription { id: Some(id), rx }) = sub {
        drop(rx);
        engine.notify.remove(&id);
    }
}

async fn next_event(sub: &mut Option<Subscription>) -> Result<TransitionEvent, RecvError> {
    match sub {
        Some(s) => s.rx.recv().await,
        None => std::future::pending().await,
    }
}

fn error_line(kind: &str, message: &str) -> Value {
    json!({ "ok": false, "error": { "kind": kind, "message": message } })
}

fn data<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::invalid(format!("could not encode response: {e}")))
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut sub: Option<Subscription> = None;

    let result = loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let reply = error_line("invalid_request", "request line too long");
                        break lines.send(reply.to_string()).await;
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handle_line(&engine, &line, &mut sub).await;
                if let Err(e) = lines.send(reply.to_string()).await {
                    break Err(e);
                }
            }
            event = next_event(&mut sub) => {
                match event {
                    Ok(event) => {
                        if let Err(e) = lines.send(json!({ "event": event }).to_string()).await {
                            break Err(e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("listener fell behind, {n} events dropped"),
                    Err(RecvError::Closed) => sub = None,
                }
            }
        }
    };

    unsubscribe(&engine, sub.take());
    result
}

async fn handle_line(engine: &Engine, line: &str, sub: &mut Option<Subscription>) -> Value {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            debug!("malformed request: {e}");
            return error_line("invalid_request", &format!("malformed request: {e}"));
        }
    };

    let op = observability::op_label(&req);
    let started = Instant::now();
    let result = dispatch(engine, req, sub).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            json!({ "ok": true, "data": data })
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "error").increment(1);
            metrics::counter!(observability::REJECTIONS_TOTAL, "kind" => e.kind()).increment(1);
            if e.is_fatal() {
                error!("{op} failed: {e}");
            }
            error_line(e.kind(), &e.to_string())
        }
    }
}

async fn dispatch(
    engine: &Engine,
    req: Request,
    sub: &mut Option<Subscription>,
) -> Result<Value, EngineError> {
    match req {
        Request::Create { actor, booking } => {
            let req = booking.into_request()?;
            data(engine.create_reservation(req, &actor).await?)
        }
        Request::Get { id } => data(engine.get(&id).await?),
        Request::List { filter } => data(engine.list(&filter).await?),
        Request::Availability {
            booking_type,
            date,
            check_out,
            exclude,
        } => {
            let booking_type: BookingType = booking_type.parse()?;
            let a = match check_out {
                Some(out) => {
                    engine
                        .check_range(booking_type, date, out, exclude.as_ref())
                        .await?
                }
                None => {
                    engine
                        .check_availability(date, booking_type, exclude.as_ref())
                        .await?
                }
            };
            data(a)
        }
        Request::Transition { id, to, context } => data(engine.transition_to(&id, to, context).await?),
        Request::Cancel { id, actor, reason } => data(engine.cancel(&id, actor, reason).await?),
        Request::CheckIn {
            id,
            actor,
            bond_collected,
        } => data(engine.check_in(&id, actor, bond_collected).await?),
        Request::CheckOut {
            id,
            actor,
            overtime_charge,
            damage_charge,
            bond_returned,
        } => data(
            engine
                .check_out(&id, actor, overtime_charge, damage_charge, bond_returned)
                .await?,
        ),
        Request::NoShow { id, actor } => data(engine.mark_no_show(&id, actor).await?),
        Request::RestartHold { id, actor } => data(engine.restart_hold(&id, actor).await?),
        Request::RecordPayment {
            id,
            kind,
            proof_ref,
            actor,
        } => data(engine.record_payment(&id, kind, &proof_ref, &actor).await?),
        Request::VerifyPayment { id, kind, actor } => {
            data(engine.verify_payment(&id, kind, &actor).await?)
        }
        Request::CanRebook { id } => {
            engine.can_rebook(&id).await?;
            Ok(json!({ "allowed": true }))
        }
        Request::RequestRebooking {
            id,
            new_check_in,
            reason,
            actor,
        } => data(
            engine
                .request_rebooking(&id, new_check_in, &reason, &actor)
                .await?,
        ),
        Request::DecideRebooking {
            id,
            approve,
            actor,
            note,
        } => data(engine.decide_rebooking(&id, approve, &actor, note).await?),
        Request::Note { id, actor, note } => data(engine.add_admin_note(&id, &actor, &note).await?),
        Request::Listen { id } => {
            if let Some(id) = &id {
                engine.get(id).await?;
            }
            let rx = match &id {
                Some(id) => engine.notify.subscribe(id),
                None => engine.notify.subscribe_all(),
            };
            let channel = id.as_ref().map_or("*".to_string(), |id| id.to_string());
            unsubscribe(engine, sub.replace(Subscription { id, rx }));
            Ok(json!({ "listening": channel }))
        }
        Request::Unlisten => {
            unsubscribe(engine, sub.take());
            Ok(json!({ "listening": null }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ops() {
        let req: Request = serde_json::from_str(
            r#"{"op":"record_payment","id":"BK-20251101-AAAAAA","kind":"deposit","proof_ref":"gcash-1","actor":{"id":"maria","role":"guest"}}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::RecordPayment { kind: PaymentKind::Deposit, .. }));

        let req: Request = serde_json::from_str(r#"{"op":"unlisten"}"#).unwrap();
        assert!(matches!(req, Request::Unlisten));

        let req: Request = serde_json::from_str(r#"{"op":"list"}"#).unwrap();
        assert!(matches!(req, Request::List { filter } if filter == Filter::default()));

        let req: Request = serde_json::from_str(
            r#"{"op":"availability","booking_type":"venue-22hours","date":"2025-12-04"}"#,
        )
        .unwrap();
        let Request::Availability { booking_type, check_out, .. } = req else {
            panic!("expected availability");
        };
        assert_eq!(booking_type.parse::<BookingType>().unwrap(), BookingType::VenueTwentyTwoHours);
        assert_eq!(check_out, None);
    }

    #[test]
    fn transition_context_defaults() {
        let req: Request = serde_json::from_str(
            r#"{"op":"transition","id":"BK-20251101-AAAAAA","to":"checked_in","context":{"actor":{"id":"jun","role":"staff"},"bond_collected":true}}"#,
        )
        .unwrap();
        let Request::Transition { to, context, .. } = req else {
            panic!("expected transition");
        };
        assert_eq!(to, Status::CheckedIn);
        assert!(context.bond_collected);
        assert_eq!(context.reason, None);
        assert_eq!(context.overtime_charge, 0);
    }

    #[test]
    fn rejects_unknown_op() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_table"}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"op":"get"}"#).is_err());
    }

    #[test]
    fn unknown_booking_type_surfaces_at_dispatch() {
        let req: Request = serde_json::from_str(
            r#"{"op":"create","actor":{"id":"x","role":"guest"},"booking":{"guest":{"name":"a","email":"a@b","phone":null,"party_size":1},"booking_type":"weekend","check_in_date":"2025-12-04","duration":1}}"#,
        )
        .unwrap();
        let Request::Create { booking, .. } = req else {
            panic!("expected create");
        };
        let err = booking.into_request().unwrap_err();
        assert_eq!(err.kind(), "unknown_booking_type");
    }

    #[test]
    fn error_shape() {
        let v = error_line("not_found", "reservation BK-1 not found");
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "not_found");
    }
}
