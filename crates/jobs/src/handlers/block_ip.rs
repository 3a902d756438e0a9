//! `block_ip`: mark an address as blocked.
//!
//! Nothing outside the job record is mutated, so the inverse is logical only.

use serde_json::{Value, json};

use tasksvc_core::{Document, DomainError, DomainResult, is_truthy};

use crate::failure::HandlerFailure;
use crate::registry::JobHandler;

pub const BLOCK_IP: &str = "block_ip";

const DEFAULT_REASON: &str = "policy";

#[derive(Debug, Clone, Copy, Default)]
pub struct BlockIpHandler;

fn ip_of(doc: &Document) -> Option<&Value> {
    doc.get("ip").filter(|ip| is_truthy(ip))
}

impl JobHandler for BlockIpHandler {
    fn validate(&self, payload: &Document) -> DomainResult<()> {
        match ip_of(payload) {
            Some(_) => Ok(()),
            None => Err(DomainError::invalid_payload(
                "block_ip requires 'ip' in payload",
            )),
        }
    }

    fn execute(&self, payload: &Document) -> Result<Document, HandlerFailure> {
        let ip = ip_of(payload).ok_or_else(|| HandlerFailure::missing_field("missing ip"))?;
        let reason = match payload.get("reason") {
            None | Some(Value::Null) => json!(DEFAULT_REASON),
            Some(reason) => reason.clone(),
        };

        let mut out = Document::new();
        out.insert("ip".into(), ip.clone());
        out.insert("blocked".into(), json!(true));
        out.insert("reason".into(), reason);
        Ok(out)
    }

    fn compensation_state(&self, payload: &Document) -> Document {
        let mut state = Document::new();
        state.insert("ip".into(), payload.get("ip").cloned().unwrap_or(Value::Null));
        state
    }

    fn compensate(&self, state: &Document) -> Result<Document, HandlerFailure> {
        let mut out = Document::new();
        match ip_of(state) {
            Some(ip) => {
                out.insert("ip".into(), ip.clone());
                out.insert("unblocked".into(), json!(true));
            }
            None => {
                out.insert("compensated".into(), json!(false));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn blocks_with_given_reason() {
        let out = BlockIpHandler
            .execute(&doc(json!({"ip": "192.168.1.123", "reason": "suspicious"})))
            .unwrap();
        assert_eq!(
            out,
            doc(json!({"ip": "192.168.1.123", "blocked": true, "reason": "suspicious"}))
        );
    }

    #[test]
    fn reason_defaults_to_policy() {
        let out = BlockIpHandler.execute(&doc(json!({"ip": "10.0.0.1"}))).unwrap();
        assert_eq!(out["reason"], "policy");
    }

    #[test]
    fn missing_ip_fails_validation_and_execution() {
        for payload in [json!({}), json!({"ip": ""}), json!({"ip": null})] {
            let payload = doc(payload);
            assert_eq!(
                BlockIpHandler.validate(&payload),
                Err(DomainError::invalid_payload("block_ip requires 'ip' in payload"))
            );
            let err = BlockIpHandler.execute(&payload).unwrap_err();
            assert_eq!(err.kind, FailureKind::MissingField);
            assert_eq!(err.message, "missing ip");
        }
    }

    #[test]
    fn compensation_unblocks_the_same_address() {
        let payload = doc(json!({"ip": "10.0.0.9", "reason": "scan"}));
        let state = BlockIpHandler.compensation_state(&payload);
        assert_eq!(state, doc(json!({"ip": "10.0.0.9"})));

        let out = BlockIpHandler.compensate(&state).unwrap();
        assert_eq!(out, doc(json!({"ip": "10.0.0.9", "unblocked": true})));
    }

    #[test]
    fn compensation_without_ip_reports_nothing_done() {
        let state = BlockIpHandler.compensation_state(&Document::new());
        let out = BlockIpHandler.compensate(&state).unwrap();
        assert_eq!(out, doc(json!({"compensated": false})));
    }
}
