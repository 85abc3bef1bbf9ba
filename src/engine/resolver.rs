//! Answering oracle queries
//!
//! Per-scenario free-text producers win, then per-scenario verifications,
//! then the profile handler. Nothing here mutates the stack, so resolution
//! is safe while a command is in flight.

use crate::common::{Error, Result};

use super::catalog::ScenarioDefinition;
use super::stack::Stack;
use super::wid::{Answer, WidEvent};

/// Which tier produced an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Edit,
    Verify,
    Handler,
}

pub struct WidResolver<'a> {
    scenario: &'a ScenarioDefinition,
}

impl<'a> WidResolver<'a> {
    pub fn new(scenario: &'a ScenarioDefinition) -> Self {
        Self { scenario }
    }

    pub fn resolve(&self, event: &WidEvent, stack: &Stack) -> Result<Answer> {
        self.resolve_with_source(event, stack).map(|(answer, _)| answer)
    }

    pub fn resolve_with_source(&self, event: &WidEvent, stack: &Stack) -> Result<(Answer, Source)> {
        let wid = event.wid;

        if let Some(producer) = self.scenario.edit1_wids.get(&wid) {
            let text = producer
                .render(stack)
                .map_err(|e| Error::unresolved_wid(wid, e.to_string()))?;
            return Ok((Answer::Text(text), Source::Edit));
        }

        if let Some(verify) = self.scenario.verify_wids.get(&wid) {
            let ok = verify
                .check(event, stack)
                .map_err(|e| Error::unresolved_wid(wid, e.to_string()))?;
            return Ok((Answer::Confirm(ok), Source::Verify));
        }

        match &self.scenario.handler {
            Some(handler) => match handler.handle(event, stack) {
                Ok(answer) => Ok((answer, Source::Handler)),
                Err(e @ Error::UnresolvedWid { .. }) => Err(e),
                Err(e) => Err(Error::unresolved_wid(wid, e.to_string())),
            },
            None => Err(Error::unresolved_wid(wid, "no handler for this WID")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::btp::types::AddrType;
    use crate::engine::binder::{BoundText, Encoding, StackRef};
    use crate::engine::stack::Identity;
    use crate::engine::wid::{style, Verify};
    use crate::common::ErrorKind;

    fn stack() -> Stack {
        Stack::new(Identity {
            address: "C0:DE:C0:DE:C0:DE".parse().unwrap(),
            addr_type: AddrType::LePublic,
            name: "iut".to_string(),
            settings: 0,
        })
    }

    fn scenario() -> ScenarioDefinition {
        let handler = |event: &WidEvent, _: &Stack| -> Result<Answer> {
            match event.wid {
                1 | 2 | 3 => Ok(Answer::Text("handler".into())),
                other => Err(Error::unresolved_wid(other, "unknown")),
            }
        };

        ScenarioDefinition::new("L2CAP/LE/CFC/BV-01-C")
            .edit1_wid(1, BoundText::new(StackRef::IutAddr, Encoding::Address))
            .verify_wid(1, Verify::Fixed(false))
            .verify_wid(2, Verify::Fixed(true))
            .handler(Arc::new(handler))
    }

    #[test]
    fn test_precedence_edit_then_verify_then_handler() {
        let scenario = scenario();
        let resolver = WidResolver::new(&scenario);
        let stack = stack();

        let (answer, source) = resolver
            .resolve_with_source(&WidEvent::new(1, style::EDIT1, ""), &stack)
            .unwrap();
        assert_eq!(answer, Answer::Text("C0DEC0DEC0DE".into()));
        assert_eq!(source, Source::Edit);

        let (answer, source) = resolver
            .resolve_with_source(&WidEvent::new(2, style::YES_NO1, ""), &stack)
            .unwrap();
        assert_eq!(answer, Answer::Confirm(true));
        assert_eq!(source, Source::Verify);

        let (_, source) = resolver
            .resolve_with_source(&WidEvent::new(3, style::OK_CANCEL1, ""), &stack)
            .unwrap();
        assert_eq!(source, Source::Handler);
    }

    #[test]
    fn test_unknown_wid_is_unresolved() {
        let scenario = scenario();
        let err = WidResolver::new(&scenario)
            .resolve(&WidEvent::new(999, style::OK_CANCEL1, ""), &stack())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedWid);
    }

    #[test]
    fn test_handler_failure_is_unresolved() {
        let failing = |_: &WidEvent, _: &Stack| -> Result<Answer> {
            Err(Error::Internal("boom".into()))
        };
        let scenario = ScenarioDefinition::new("X").handler(Arc::new(failing));
        let err = WidResolver::new(&scenario)
            .resolve(&WidEvent::new(5, style::OK1, ""), &stack())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedWid);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_missing_handler_is_unresolved() {
        let scenario = ScenarioDefinition::new("X");
        let err = WidResolver::new(&scenario)
            .resolve(&WidEvent::new(5, style::OK1, ""), &stack())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedWid);
    }
}
