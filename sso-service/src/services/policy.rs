//! Access policy evaluation.

use std::collections::HashSet;

use crate::models::{AuthLevel, Mapping, Policy, SubjectKind, User};

/// Stateless policy evaluator.
#[derive(Debug, Clone, Copy)]
pub struct PolicyService;

impl PolicyService {
    /// Whether `policy` governs `user` right now.
    ///
    /// Policies open to anonymous access apply to everyone. Otherwise the
    /// first enabled subject that matches decides; concrete users and the
    /// "authenticated" sentinel only match once the user has reached the
    /// policy's level.
    pub fn applies_to(policy: &Policy, user: &User) -> bool {
        Self::matches(policy, user, true)
    }

    /// Like [`PolicyService::applies_to`] but ignoring the user's level:
    /// would the policy apply once the user finished logging in. For
    /// previews only, never for an access decision.
    pub fn theoretically_applies_to(policy: &Policy, user: &User) -> bool {
        Self::matches(policy, user, false)
    }

    fn matches(policy: &Policy, user: &User, check_level: bool) -> bool {
        if policy.auth_level == AuthLevel::Anonymous {
            return true;
        }

        let level_ok = !check_level || user.auth_level() >= policy.auth_level;

        policy
            .subjects
            .iter()
            .filter(|subject| subject.enabled && policy.enabled)
            .any(|subject| match &subject.kind {
                SubjectKind::Anyone => true,
                SubjectKind::AnyAuthenticated => level_ok,
                SubjectKind::User { .. } => subject.kind.identifies(user) && level_ok,
            })
    }

    /// Enabled mappings reachable through the policies that apply to
    /// `user`, each listed once in first-seen order.
    pub fn accessible_mappings<'a>(policies: &'a [Policy], user: &User) -> Vec<&'a Mapping> {
        let mut seen = HashSet::new();
        policies
            .iter()
            .filter(|policy| Self::applies_to(policy, user))
            .flat_map(|policy| policy.mappings.iter())
            .filter(|mapping| mapping.enabled && seen.insert(mapping.id))
            .collect()
    }

    /// Access decision for one mapping.
    pub fn grants(policies: &[Policy], user: &User, mapping: &Mapping) -> bool {
        mapping.enabled
            && policies.iter().any(|policy| {
                policy.mappings.iter().any(|m| m.id == mapping.id) && Self::applies_to(policy, user)
            })
    }
}
