//! Entitlement resolution: what a plan grants for a feature, independent of
//! any subscription.

use crate::{Amount, Feature, Interval, PeriodSpec, Plan, PlanFeature, Result};
use chrono::{DateTime, Utc};

impl Plan {
    /// Entitlement for `feature_name`, if attached.
    pub fn entitlement(&self, feature_name: &str) -> Option<&PlanFeature> {
        self.features.iter().find(|f| f.feature_name == feature_name)
    }

    /// True iff every listed feature is attached. An empty list is vacuously true.
    pub fn has_feature<S: AsRef<str>>(&self, feature_names: &[S]) -> bool {
        feature_names
            .iter()
            .all(|name| self.entitlement(name.as_ref()).is_some())
    }

    /// True iff at least one listed feature is attached.
    pub fn has_any_feature<S: AsRef<str>>(&self, feature_names: &[S]) -> bool {
        feature_names
            .iter()
            .any(|name| self.entitlement(name.as_ref()).is_some())
    }

    /// Configured allowance, zero when the feature is not attached.
    pub fn value_in_plan(&self, feature_name: &str) -> Amount {
        self.entitlement(feature_name)
            .map(|f| f.value)
            .unwrap_or_default()
    }

    pub fn resettable_period_in_plan(&self, feature_name: &str) -> Option<u32> {
        self.entitlement(feature_name)
            .and_then(|f| f.resettable_period)
    }

    pub fn resettable_interval_in_plan(&self, feature_name: &str) -> Option<Interval> {
        self.entitlement(feature_name)
            .and_then(|f| f.resettable_interval)
    }

    /// Reset window for `feature_name`; `None` means a permanent allowance.
    pub fn reset_policy_in_plan(&self, feature_name: &str) -> Option<PeriodSpec> {
        self.entitlement(feature_name)
            .and_then(PlanFeature::reset_policy)
    }
}

impl Feature {
    pub fn exists_in_plan(&self, plan: &Plan) -> bool {
        plan.has_feature(&[self.name.as_str()])
    }

    pub fn value_in_plan(&self, plan: &Plan) -> Amount {
        plan.value_in_plan(&self.name)
    }
}

/// Plans that attach at least one of `feature_names`.
pub fn plans_with_any_feature<'a, S: AsRef<str>>(
    plans: &'a [Plan],
    feature_names: &[S],
) -> Vec<&'a Plan> {
    plans
        .iter()
        .filter(|plan| plan.has_any_feature(feature_names))
        .collect()
}

/// End of the first reset window of an entitlement for a subscription that
/// started at `starts_at`, or `None` if the feature never resets.
pub fn validity_ends_at(
    entitlement: &PlanFeature,
    starts_at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    entitlement
        .reset_policy()
        .map(|reset| reset.end_from(starts_at))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn catalog() -> (Feature, Feature, Plan) {
        let api = Feature::new("api_calls");
        let seats = Feature::new("seats").resettable(false);
        let plan = Plan::new("Pro", Amount::from_int(49))
            .with_feature(
                PlanFeature::new(&api, Amount::from_int(1000))
                    .with_reset(PeriodSpec::new(1, Interval::Month).unwrap()),
            )
            .with_feature(PlanFeature::new(&seats, Amount::from_int(5)));
        (api, seats, plan)
    }

    #[test]
    fn test_has_feature_requires_all() {
        let (_, _, plan) = catalog();
        assert!(plan.has_feature(&["api_calls"]));
        assert!(plan.has_feature(&["api_calls", "seats"]));
        assert!(!plan.has_feature(&["api_calls", "sso"]));
        assert!(plan.has_any_feature(&["sso", "seats"]));
        assert!(!plan.has_any_feature(&["sso"]));
    }

    #[test]
    fn test_value_and_reset_lookup() {
        let (api, seats, plan) = catalog();
        assert_eq!(api.value_in_plan(&plan), Amount::from_int(1000));
        assert_eq!(plan.value_in_plan("sso"), Amount::zero());

        assert_eq!(plan.resettable_period_in_plan("api_calls"), Some(1));
        assert_eq!(
            plan.resettable_interval_in_plan("api_calls"),
            Some(Interval::Month)
        );
        assert_eq!(plan.resettable_period_in_plan("seats"), None);
        assert!(plan.reset_policy_in_plan("seats").is_none());
        assert!(seats.exists_in_plan(&plan));
    }

    #[test]
    fn test_plans_with_any_feature() {
        let (_, _, pro) = catalog();
        let basic = Plan::new("Basic", Amount::zero());
        let plans = vec![basic, pro];

        let matching = plans_with_any_feature(&plans, &["seats"]);
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].name, "Pro");
    }

    #[test]
    fn test_validity_uses_interval_value() {
        let (_, _, plan) = catalog();
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();

        let api = plan.entitlement("api_calls").unwrap();
        assert_eq!(
            validity_ends_at(api, start).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap())
        );

        let seats = plan.entitlement("seats").unwrap();
        assert_eq!(validity_ends_at(seats, start).unwrap(), None);
    }
}
