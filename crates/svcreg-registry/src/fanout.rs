//! Fan-out planning.
//!
//! Pure functions over `(patch, dependents)`. Each dependent receives only
//! the entries whose service name it declared as required; dependents with
//! nothing relevant receive nothing. Delivery lives in [`crate::delivery`].

use svcreg_common::{Patch, PatchEntry, Registration};

/// One patch addressed to one dependent's update endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDelivery {
    pub update_url: String,
    pub patch: Patch,
}

/// Computes the minimal sub-patch for every dependent.
pub fn plan<'a, I>(full: &Patch, dependents: I) -> Vec<PlannedDelivery>
where
    I: IntoIterator<Item = &'a Registration>,
{
    dependents
        .into_iter()
        .filter_map(|dependent| {
            full.restricted_to(&dependent.required_services)
                .map(|patch| PlannedDelivery {
                    update_url: dependent.service_update_url.clone(),
                    patch,
                })
        })
        .collect()
}

/// Builds the priming patch for `registration`: every registered instance
/// whose name it requires, in registration order.
///
/// The registration itself is never listed, even if it requires its own name.
pub fn required_services_patch<'a, I>(registration: &Registration, registered: I) -> Patch
where
    I: IntoIterator<Item = &'a Registration>,
{
    let added: Vec<PatchEntry> = registered
        .into_iter()
        .filter(|existing| existing.service_url != registration.service_url)
        .filter(|existing| registration.requires(&existing.service_name))
        .map(Registration::entry)
        .collect();

    Patch {
        added,
        removed: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcreg_common::ServiceName;

    fn registration(name: &str, url: &str, requires: &[&str]) -> Registration {
        Registration {
            service_name: ServiceName::from(name),
            service_url: url.to_string(),
            heartbeat_url: format!("{}/heartbeat", url),
            required_services: requires.iter().map(|s| ServiceName::from(*s)).collect(),
            service_update_url: format!("{}/services", url),
        }
    }

    #[test]
    fn test_plan_targets_only_interested_dependents() {
        let a = registration("A", "http://a", &["X"]);
        let c = registration("C", "http://c", &["Y"]);
        let x = registration("X", "http://x", &[]);

        let planned = plan(&Patch::added(x.entry()), [&a, &c]);

        assert_eq!(
            planned,
            vec![PlannedDelivery {
                update_url: "http://a/services".to_string(),
                patch: Patch::added(PatchEntry::new("X", "http://x")),
            }]
        );
    }

    #[test]
    fn test_plan_splits_mixed_patch_per_dependent() {
        let needs_x = registration("A", "http://a", &["X"]);
        let needs_both = registration("B", "http://b", &["X", "Y"]);
        let full = Patch {
            added: vec![PatchEntry::new("Y", "http://y2")],
            removed: vec![PatchEntry::new("X", "http://x1")],
        };

        let planned = plan(&full, [&needs_x, &needs_both]);

        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].patch, Patch::removed(PatchEntry::new("X", "http://x1")));
        assert_eq!(planned[1].patch, full);
    }

    #[test]
    fn test_plan_with_no_dependents_is_empty() {
        let x = registration("X", "http://x", &[]);
        assert!(plan(&Patch::added(x.entry()), std::iter::empty()).is_empty());
    }

    #[test]
    fn test_required_services_patch_lists_matching_instances_in_order() {
        let b1 = registration("B", "http://b1", &[]);
        let other = registration("Z", "http://z", &[]);
        let b2 = registration("B", "http://b2", &[]);
        let a = registration("A", "http://a", &["B"]);

        let patch = required_services_patch(&a, [&b1, &other, &b2]);

        assert_eq!(
            patch.added,
            vec![PatchEntry::new("B", "http://b1"), PatchEntry::new("B", "http://b2")]
        );
        assert!(patch.removed.is_empty());
    }

    #[test]
    fn test_required_services_patch_skips_self() {
        let a = registration("A", "http://a", &["A"]);
        let peer = registration("A", "http://a2", &["A"]);

        let patch = required_services_patch(&a, [&a, &peer]);
        assert_eq!(patch.added, vec![PatchEntry::new("A", "http://a2")]);
    }
}
