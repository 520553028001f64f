//! Expands `@parametrize` decorators into one [`TestItem`] per argument
//! combination. Stacked decorators are expanded as a Cartesian product with
//! the outermost decorator (closest to the top of the source, i.e. the
//! first one `markers` records) varying slowest.

use indexmap::IndexMap;

use crate::model::{LiteralValue, MarkerRecord, TestItem};

#[derive(Debug, Clone, PartialEq)]
pub enum Indirect {
    None,
    All,
    Names(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ParametrizeSpec {
    pub argnames: Vec<String>,
    pub argvalues: Vec<LiteralValue>,
    pub ids: Option<Vec<String>>,
    pub indirect: Indirect,
}

pub fn parse_spec(marker: &MarkerRecord) -> Option<ParametrizeSpec> {
    if marker.name != "parametrize" {
        return None;
    }
    let argnames_raw = marker.positional_args.first()?;
    let argnames = match argnames_raw {
        LiteralValue::Str(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => return None,
    };
    let argvalues = match marker.positional_args.get(1)? {
        LiteralValue::List(items) | LiteralValue::Tuple(items) => items.clone(),
        other => vec![other.clone()],
    };
    let ids = marker.named("ids").and_then(|v| match v {
        LiteralValue::List(items) | LiteralValue::Tuple(items) => Some(
            items
                .iter()
                .map(LiteralValue::render_id_fragment)
                .collect(),
        ),
        _ => None,
    });
    let indirect = match marker.named("indirect") {
        Some(LiteralValue::Bool(true)) => Indirect::All,
        Some(LiteralValue::List(items)) | Some(LiteralValue::Tuple(items)) => Indirect::Names(
            items
                .iter()
                .filter_map(|v| match v {
                    LiteralValue::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
        ),
        _ => Indirect::None,
    };
    Some(ParametrizeSpec {
        argnames,
        argvalues,
        ids,
        indirect,
    })
}

struct Combo {
    assignments: Vec<(String, LiteralValue)>,
    id_fragments: Vec<String>,
    extra_marks: Vec<String>,
}

/// Expands a base test function into its parametrized [`TestItem`]s. `specs`
/// must be in source order (outermost decorator first). `base_markers` are
/// the non-parametrize markers recorded on the function, passed through
/// unchanged to every expanded item.
pub fn expand(
    base_id: &str,
    function_name: &str,
    specs: &[ParametrizeSpec],
    declared_params: &[String],
    base_markers: &[MarkerRecord],
    build_item: impl Fn(&str, Option<IndexMap<String, String>>, Vec<MarkerRecord>, Vec<String>) -> TestItem,
) -> Vec<TestItem> {
    if specs.is_empty() {
        let fixture_deps = declared_params.to_vec();
        return vec![build_item(base_id, None, base_markers.to_vec(), fixture_deps)];
    }

    let mut combos: Vec<Combo> = vec![Combo {
        assignments: Vec::new(),
        id_fragments: Vec::new(),
        extra_marks: Vec::new(),
    }];

    for spec in specs {
        let mut next = Vec::with_capacity(combos.len() * spec.argvalues.len());
        for combo in &combos {
            for (idx, raw_value) in spec.argvalues.iter().enumerate() {
                let (values, explicit_id, marks) = match raw_value {
                    LiteralValue::ParamCase { values, id, marks } => {
                        (values.clone(), id.clone(), marks.clone())
                    }
                    other if spec.argnames.len() > 1 => match other {
                        LiteralValue::Tuple(items) => (items.clone(), None, Vec::new()),
                        _ => (vec![other.clone()], None, Vec::new()),
                    },
                    other => (vec![other.clone()], None, Vec::new()),
                };

                let mut assignments = combo.assignments.clone();
                for (name, value) in spec.argnames.iter().zip(values.iter()) {
                    assignments.push((name.clone(), value.clone()));
                }

                let id_fragment = spec
                    .ids
                    .as_ref()
                    .and_then(|ids| ids.get(idx).cloned())
                    .or(explicit_id)
                    .unwrap_or_else(|| canonical_id_fragment(&spec.argnames, &values, idx));

                let mut id_fragments = combo.id_fragments.clone();
                id_fragments.push(id_fragment);

                let mut extra_marks = combo.extra_marks.clone();
                extra_marks.extend(marks);

                next.push(Combo {
                    assignments,
                    id_fragments,
                    extra_marks,
                });
            }
        }
        combos = next;
    }

    let indirect_names: Vec<&str> = specs
        .iter()
        .flat_map(|s| match &s.indirect {
            Indirect::None => Vec::new(),
            Indirect::All => s.argnames.iter().map(|n| n.as_str()).collect(),
            Indirect::Names(names) => names.iter().map(|n| n.as_str()).collect(),
        })
        .collect();

    let parametrized_names: Vec<&str> = specs
        .iter()
        .flat_map(|s| s.argnames.iter().map(|n| n.as_str()))
        .collect();

    combos
        .into_iter()
        .map(|combo| {
            let mut params = IndexMap::new();
            for (name, value) in &combo.assignments {
                params.insert(name.clone(), value.render_source());
            }
            let id = format!("{base_id}[{}]", combo.id_fragments.join("-"));
            let fixture_deps: Vec<String> = declared_params
                .iter()
                .filter(|p| !parametrized_names.contains(&p.as_str()) || indirect_names.contains(&p.as_str()))
                .cloned()
                .collect();
            let mut markers = base_markers.to_vec();
            for mark_name in combo.extra_marks {
                markers.push(MarkerRecord::new(mark_name));
            }
            let _ = function_name;
            build_item(&id, Some(params), markers, fixture_deps)
        })
        .collect()
}

fn canonical_id_fragment(argnames: &[String], values: &[LiteralValue], index: usize) -> String {
    match values.len() {
        1 => match &values[0] {
            LiteralValue::Int(_) | LiteralValue::Float(_) | LiteralValue::Str(_) | LiteralValue::Bool(_) | LiteralValue::None => {
                values[0].render_id_fragment()
            }
            _ => format!("{}{index}", argnames.first().cloned().unwrap_or_else(|| "param".to_string())),
        },
        _ => values
            .iter()
            .map(LiteralValue::render_id_fragment)
            .collect::<Vec<_>>()
            .join("-"),
    }
}
