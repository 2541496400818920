use std::collections::HashMap;

use log::debug;
use regex::Regex;

use crate::model::{Metric, TaggedResource};

/// Outcome of binding a candidate metric to the discovered resources.
#[derive(Debug, PartialEq)]
pub enum Association<'a> {
    /// A dimension-regex family matched by name and value.
    Owned(&'a TaggedResource),
    /// No family matched the metric's dimension names at all; the metric
    /// is still exported without an owner.
    Unowned,
    /// A family matched by name set but no resource carries these
    /// dimension values, so the metric belongs to an undiscovered
    /// resource and must be dropped.
    Skip,
}

/// One regex family: all resources whose ARN matched a regex producing
/// this set of dimension names, keyed by their dimension-value signature.
struct SignatureSlot<'a> {
    names: Vec<String>,
    resources: HashMap<String, &'a TaggedResource>,
}

/// Binds candidate metrics to at most one resource each, preferring the
/// regex family whose dimension names form the largest subset of the
/// metric's dimensions (an ECS service metric must not land on the
/// cluster resource).
pub struct MaxDimensionAssociator<'a> {
    slots: Vec<SignatureSlot<'a>>,
}

fn signature(pairs: &mut Vec<(String, String)>) -> String {
    pairs.sort();
    pairs
        .iter()
        .map(|(name, value)| format!("{name}\u{1}{value}"))
        .collect::<Vec<_>>()
        .join("\u{2}")
}

impl<'a> MaxDimensionAssociator<'a> {
    pub fn new(regexps: &[Regex], resources: &'a [TaggedResource]) -> Self {
        let mut slots: Vec<SignatureSlot<'a>> = Vec::new();

        for resource in resources {
            for regexp in regexps {
                let Some(captures) = regexp.captures(&resource.arn) else {
                    continue;
                };
                let mut pairs: Vec<(String, String)> = Vec::new();
                for name in regexp.capture_names().flatten() {
                    if let Some(value) = captures.name(name) {
                        // Group names cannot hold spaces, dimension
                        // names can.
                        pairs.push((name.replace('_', " "), value.as_str().to_string()));
                    }
                }
                if pairs.is_empty() {
                    continue;
                }
                let mut names: Vec<String> =
                    pairs.iter().map(|(name, _)| name.clone()).collect();
                names.sort();
                let sig = signature(&mut pairs);

                match slots.iter_mut().find(|slot| slot.names == names) {
                    Some(slot) => {
                        slot.resources.entry(sig).or_insert(resource);
                    }
                    None => {
                        let mut map = HashMap::new();
                        map.insert(sig, resource);
                        slots.push(SignatureSlot {
                            names,
                            resources: map,
                        });
                    }
                }
            }
        }

        MaxDimensionAssociator { slots }
    }

    pub fn associate(&self, metric: &Metric) -> Association<'a> {
        let mut metric_names: Vec<&str> =
            metric.dimensions.iter().map(|d| d.name.as_str()).collect();
        metric_names.sort_unstable();

        // Largest matching name subset wins; insertion order breaks ties.
        let mut best: Option<&SignatureSlot<'a>> = None;
        for slot in &self.slots {
            if !slot
                .names
                .iter()
                .all(|name| metric_names.binary_search(&name.as_str()).is_ok())
            {
                continue;
            }
            if best.map_or(true, |b| slot.names.len() > b.names.len()) {
                best = Some(slot);
            }
        }

        let Some(slot) = best else {
            return Association::Unowned;
        };

        let mut pairs: Vec<(String, String)> = metric
            .dimensions
            .iter()
            .filter(|d| slot.names.contains(&d.name))
            .map(|d| (d.name.clone(), d.value.clone()))
            .collect();
        match slot.resources.get(&signature(&mut pairs)) {
            Some(resource) => Association::Owned(resource),
            None => {
                debug!(
                    "dropping {}/{}: no resource matches its dimension values",
                    metric.namespace, metric.name
                );
                Association::Skip
            }
        }
    }
}
