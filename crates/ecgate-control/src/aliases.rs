//! Alias fan-out of a destination.
//!
//! A destination's alias rules name other destinations that receive their own
//! transfer of the same data file. Rules are followed through the aliased
//! destinations' own rules; each destination appears at most once. Values set
//! by a rule are inherited by the next level and delays add up.

use std::collections::HashSet;

use chrono::TimeDelta;
use ecgate_core::parse_duration;
use ecgate_store::{AliasRule, Destination, Store};

use crate::error::Result;
use crate::overrides::applies;
use crate::request::base_name;

/// One destination of the fan-out with its effective parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTarget {
    /// The destination.
    pub destination: Destination,
    /// Target file name on this destination.
    pub target: String,
    /// Lifetime override.
    pub lifetime: Option<TimeDelta>,
    /// Delay added to the schedule.
    pub delay: TimeDelta,
    /// Priority.
    pub priority: u8,
    /// Deliver as soon as possible.
    pub asap: bool,
    /// Trigger an event on delivery.
    pub event: bool,
    /// Destinations crossed from the main destination, this one last.
    pub via: Vec<String>,
}

impl AliasTarget {
    /// Whether this is the main destination rather than an alias.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.via.is_empty()
    }

    /// Audit suffix of the transfer comment, empty for the main destination.
    #[must_use]
    pub fn comment_suffix(&self, main: &str) -> String {
        if self.is_main() {
            return String::new();
        }
        let mut suffix = format!(" aliased from Destination={main}");
        let intermediates = &self.via[..self.via.len() - 1];
        if !intermediates.is_empty() {
            let chain: Vec<String> = intermediates
                .iter()
                .map(|name| format!("Destination={name}"))
                .collect();
            suffix.push_str(" via ");
            suffix.push_str(&chain.join(", "));
        }
        suffix
    }
}

/// Resolve the main destination and every alias applying to `target`.
///
/// The main destination comes first. Rules naming an unknown destination are
/// skipped with a warning.
///
/// # Errors
///
/// Returns a storage error.
pub fn resolve_aliases<S: Store + ?Sized>(
    store: &S,
    main: &Destination,
    target: &str,
    priority: u8,
    asap: bool,
    event: bool,
) -> Result<Vec<AliasTarget>> {
    let mut visited = HashSet::from([main.name.clone()]);
    let mut resolved = vec![AliasTarget {
        destination: main.clone(),
        target: target.to_string(),
        lifetime: None,
        delay: TimeDelta::zero(),
        priority,
        asap,
        event,
        via: Vec::new(),
    }];
    // Index of the next resolved entry whose rules are expanded
    let mut next = 0;
    while next < resolved.len() {
        let parent = resolved[next].clone();
        next += 1;
        for rule in &parent.destination.aliases {
            if visited.contains(&rule.destination)
                || !applies(rule.pattern.as_deref(), rule.ignore.as_deref(), &parent.target)
            {
                continue;
            }
            let Some(destination) = store.get_destination(&rule.destination)? else {
                tracing::warn!(
                    destination = %parent.destination.name,
                    alias = %rule.destination,
                    "alias destination not found"
                );
                continue;
            };
            visited.insert(rule.destination.clone());
            let alias = apply_rule(&parent, rule, destination);
            tracing::debug!(
                destination = %parent.destination.name,
                alias = %alias.destination.name,
                target = %alias.target,
                "alias applied"
            );
            resolved.push(alias);
        }
    }
    Ok(resolved)
}

fn apply_rule(parent: &AliasTarget, rule: &AliasRule, destination: Destination) -> AliasTarget {
    let target = rule.target.as_deref().map_or_else(
        || parent.target.clone(),
        |template| expand_template(template, &parent.target, &parent.destination.name, &rule.destination),
    );
    let lifetime = rule
        .lifetime
        .as_deref()
        .and_then(|value| positive(value, "lifetime"))
        .or(parent.lifetime);
    let extra = rule
        .delay
        .as_deref()
        .and_then(|value| positive(value, "delay"))
        .unwrap_or_else(TimeDelta::zero);
    let mut via = parent.via.clone();
    via.push(rule.destination.clone());
    AliasTarget {
        destination,
        target,
        lifetime,
        delay: parent.delay + extra,
        priority: rule.priority.map_or(parent.priority, |p| p.min(99)),
        asap: rule.asap.unwrap_or(parent.asap),
        event: rule.event.unwrap_or(parent.event),
        via,
    }
}

fn positive(value: &str, option: &str) -> Option<TimeDelta> {
    match parse_duration(value) {
        Ok(duration) if duration > TimeDelta::zero() => Some(duration),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(option, value, error = %e, "invalid duration in alias rule");
            None
        }
    }
}

/// Substitute `$target`, `$name`, `$destination` and `$alias` in a target template.
#[must_use]
pub fn expand_template(template: &str, target: &str, destination: &str, alias: &str) -> String {
    template
        .replace("$target", target)
        .replace("$name", base_name(target))
        .replace("$destination", destination)
        .replace("$alias", alias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecgate_store::RocksStore;
    use tempfile::TempDir;

    fn rule(destination: &str) -> AliasRule {
        AliasRule {
            destination: destination.to_string(),
            pattern: None,
            ignore: None,
            target: None,
            lifetime: None,
            priority: None,
            delay: None,
            asap: None,
            event: None,
        }
    }

    fn setup(destinations: Vec<Destination>) -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        for destination in &destinations {
            store.put_destination(destination).unwrap();
        }
        (store, dir)
    }

    #[test]
    fn no_aliases() {
        let main = Destination::new("main");
        let (store, _dir) = setup(vec![main.clone()]);
        let resolved = resolve_aliases(&store, &main, "a/b.grib", 50, false, false).unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].is_main());
        assert_eq!(resolved[0].comment_suffix("main"), "");
    }

    #[test]
    fn chained_aliases_inherit_and_stop_on_cycles() {
        let mut main = Destination::new("main");
        main.aliases = vec![AliasRule {
            target: Some("copy/$name".into()),
            priority: Some(10),
            delay: Some("1h".into()),
            ..rule("a")
        }];
        let mut a = Destination::new("a");
        a.aliases = vec![
            AliasRule {
                delay: Some("30m".into()),
                asap: Some(true),
                ..rule("b")
            },
            rule("main"),
        ];
        let mut b = Destination::new("b");
        b.aliases = vec![rule("a")];
        let (store, _dir) = setup(vec![main.clone(), a, b]);

        let resolved = resolve_aliases(&store, &main, "dir/file.grib", 50, false, true).unwrap();
        let names: Vec<_> = resolved.iter().map(|t| t.destination.name.as_str()).collect();
        assert_eq!(names, ["main", "a", "b"]);

        let a = &resolved[1];
        assert_eq!(a.target, "copy/file.grib");
        assert_eq!(a.priority, 10);
        assert_eq!(a.delay, TimeDelta::hours(1));
        assert_eq!(a.comment_suffix("main"), " aliased from Destination=main");

        let b = &resolved[2];
        assert_eq!(b.target, "copy/file.grib");
        assert_eq!(b.priority, 10);
        assert_eq!(b.delay, TimeDelta::minutes(90));
        assert!(b.asap);
        assert!(b.event);
        assert_eq!(
            b.comment_suffix("main"),
            " aliased from Destination=main via Destination=a"
        );
    }

    #[test]
    fn patterns_filter_aliases() {
        let mut main = Destination::new("main");
        main.aliases = vec![
            AliasRule {
                pattern: Some(r".*\.grib".into()),
                ..rule("gribs")
            },
            AliasRule {
                ignore: Some(r".*\.tmp".into()),
                ..rule("others")
            },
            rule("missing"),
        ];
        let (store, _dir) = setup(vec![
            main.clone(),
            Destination::new("gribs"),
            Destination::new("others"),
        ]);

        let resolved = resolve_aliases(&store, &main, "x.tmp", 50, false, false).unwrap();
        assert_eq!(resolved.len(), 1);

        let resolved = resolve_aliases(&store, &main, "x.grib", 50, false, false).unwrap();
        let names: Vec<_> = resolved.iter().map(|t| t.destination.name.as_str()).collect();
        assert_eq!(names, ["main", "gribs", "others"]);
    }

    #[test]
    fn template_substitutions() {
        assert_eq!(
            expand_template("$destination/$alias/$name", "a/b/c.txt", "main", "copy"),
            "main/copy/c.txt"
        );
        assert_eq!(expand_template("$target.bak", "a/c.txt", "m", "x"), "a/c.txt.bak");
    }
}
