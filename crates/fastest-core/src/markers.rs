//! Turns `@pytest.mark.*`-shaped decorators into [`MarkerRecord`]s.
//! Non-marker decorators (`@pytest.fixture`, `@staticmethod`, ...) are
//! recognized elsewhere and never reach this module.

use crate::model::MarkerRecord;
use crate::parser::RawDecorator;

const MARK_PREFIXES: &[&str] = &["pytest.mark.", "fastest.mark.", "mark."];

pub const RECOGNIZED: &[&str] = &["skip", "skipif", "xfail", "parametrize", "timeout"];

/// Strips a recognized `mark.` prefix, returning the bare marker name if the
/// decorator is mark-shaped at all.
pub fn mark_name(callee: &str) -> Option<&str> {
    for prefix in MARK_PREFIXES {
        if let Some(rest) = callee.strip_prefix(prefix) {
            return Some(rest);
        }
    }
    None
}

pub fn marker_from_decorator(decorator: &RawDecorator) -> Option<MarkerRecord> {
    let name = mark_name(&decorator.callee)?;
    Some(MarkerRecord {
        name: name.to_string(),
        positional_args: decorator.args.clone(),
        named_args: decorator.kwargs.clone().into_iter().collect(),
    })
}

pub fn extract_markers(decorators: &[RawDecorator]) -> Vec<MarkerRecord> {
    decorators.iter().filter_map(marker_from_decorator).collect()
}

/// `skip`/`skipif` evaluation. `skipif`'s condition is static source text we
/// cannot evaluate; a bare `skipif(True)`/`skipif(False)` literal is still
/// honored since it IS a recognized literal.
pub fn skip_reason(markers: &[MarkerRecord]) -> Option<String> {
    for marker in markers {
        match marker.name.as_str() {
            "skip" => {
                let reason = marker
                    .positional_args
                    .first()
                    .map(|v| v.render_id_fragment())
                    .or_else(|| marker.named("reason").map(|v| v.render_id_fragment()))
                    .unwrap_or_else(|| "skipped".to_string());
                return Some(reason);
            }
            "skipif" => {
                let condition_true = matches!(
                    marker.positional_args.first(),
                    Some(crate::model::LiteralValue::Bool(true))
                );
                if condition_true {
                    let reason = marker
                        .named("reason")
                        .map(|v| v.render_id_fragment())
                        .unwrap_or_else(|| "conditional skip".to_string());
                    return Some(reason);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn xfail_reason(markers: &[MarkerRecord]) -> Option<Option<String>> {
    markers
        .iter()
        .find(|m| m.name == "xfail")
        .map(|m| m.positional_args.first().map(|v| v.render_id_fragment()))
}

pub fn xfail_is_strict(markers: &[MarkerRecord]) -> bool {
    markers
        .iter()
        .find(|m| m.name == "xfail")
        .and_then(|m| m.named("strict"))
        .map(|v| matches!(v, crate::model::LiteralValue::Bool(true)))
        .unwrap_or(false)
}

pub fn timeout_seconds(markers: &[MarkerRecord]) -> Option<f64> {
    let marker = markers.iter().find(|m| m.name == "timeout")?;
    match marker.positional_args.first()? {
        crate::model::LiteralValue::Int(i) => Some(*i as f64),
        crate::model::LiteralValue::Float(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LiteralValue;

    #[test]
    fn recognizes_mark_prefixes() {
        assert_eq!(mark_name("pytest.mark.skip"), Some("skip"));
        assert_eq!(mark_name("fastest.mark.xfail"), Some("xfail"));
        assert_eq!(mark_name("staticmethod"), None);
    }

    #[test]
    fn skip_reason_reads_positional_or_kwarg() {
        let m = MarkerRecord {
            name: "skip".to_string(),
            positional_args: vec![LiteralValue::Str("not ready".to_string())],
            named_args: Default::default(),
        };
        assert_eq!(skip_reason(&[m]).as_deref(), Some("not ready"));
    }

    #[test]
    fn skipif_only_skips_on_true_literal() {
        let m = MarkerRecord {
            name: "skipif".to_string(),
            positional_args: vec![LiteralValue::Bool(false)],
            named_args: Default::default(),
        };
        assert_eq!(skip_reason(&[m]), None);
    }
}
