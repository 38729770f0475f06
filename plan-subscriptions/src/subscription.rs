use crate::{
    Amount, IntervalOffset, Period, Plan, PlanId, Result, SubscriberRef, SubscriptionError,
    SubscriptionId,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One billing term of a subscriber on a plan.
///
/// Trial, grace and the overall [`SubscriptionStatus`] are never stored;
/// they are derived from the timestamps and the plan on every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub subscriber: SubscriberRef,
    pub plan_id: PlanId,
    /// Plan price at creation; later plan price changes do not affect it.
    pub price: Amount,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a subscription stands at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Grace,
    Ended,
    Canceled,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Grace => "grace",
            Self::Ended => "ended",
            Self::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// A requested move of `ends_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndDateChange {
    /// Absolute new end.
    At(DateTime<Utc>),
    /// Signed duration added to the current end.
    By(Duration),
    /// Signed calendar offset added to the current end.
    Offset(IntervalOffset),
}

impl EndDateChange {
    /// Parse an offset such as `"+1 month"`.
    pub fn offset(spec: &str) -> Result<Self> {
        Ok(Self::Offset(spec.parse()?))
    }

    pub fn resolve(&self, current_end: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Self::At(at) => Ok(*at),
            Self::By(delta) => current_end.checked_add_signed(*delta).ok_or_else(|| {
                SubscriptionError::InvalidArgument(format!(
                    "shifting {current_end} by {delta} is out of range"
                ))
            }),
            Self::Offset(offset) => offset.apply(current_end),
        }
    }
}

impl Subscription {
    /// Start a subscription on `plan`, stamping its first invoice period.
    ///
    /// `starts_at` defaults to `now`; the price is snapshotted from the plan.
    pub fn start(
        subscriber: SubscriberRef,
        plan: &Plan,
        starts_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let period = Period::from_spec(starts_at.unwrap_or(now), &plan.invoice)?;
        Ok(Self {
            id: SubscriptionId::generate(),
            subscriber,
            plan_id: plan.id.clone(),
            price: plan.price,
            starts_at: period.start(),
            ends_at: period.end(),
            canceled_at: None,
            timezone: None,
            created_at: now,
        })
    }

    pub fn with_timezone(mut self, timezone: Option<String>) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ends_at <= self.starts_at {
            return Err(SubscriptionError::InvalidArgument(format!(
                "subscription {} must end after it starts",
                self.id
            )));
        }
        Ok(())
    }

    /// `None` when the plan has no trial.
    pub fn trial_ends_at(&self, plan: &Plan) -> Result<Option<DateTime<Utc>>> {
        plan.trial
            .map(|trial| trial.end_from(self.starts_at))
            .transpose()
    }

    /// `None` when the plan has no grace period.
    pub fn grace_ends_at(&self, plan: &Plan) -> Result<Option<DateTime<Utc>>> {
        plan.grace
            .map(|grace| grace.end_from(self.ends_at))
            .transpose()
    }

    pub fn canceled(&self, now: DateTime<Utc>) -> bool {
        self.canceled_at.is_some_and(|at| now >= at)
    }

    pub fn ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.ended(now) && !self.canceled(now)
    }

    pub fn on_trial(&self, plan: &Plan, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.trial_ends_at(plan)?.is_some_and(|end| now < end))
    }

    /// Ended, not canceled, and still inside the plan's grace window.
    /// Cancellation always takes precedence over grace.
    pub fn on_grace(&self, plan: &Plan, now: DateTime<Utc>) -> Result<bool> {
        if !self.ended(now) || self.canceled(now) {
            return Ok(false);
        }
        Ok(self.grace_ends_at(plan)?.is_some_and(|end| now < end))
    }

    pub fn completely_ended(&self, plan: &Plan, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.ended(now) && !self.on_grace(plan, now)?)
    }

    pub fn status(&self, plan: &Plan, now: DateTime<Utc>) -> Result<SubscriptionStatus> {
        if self.canceled(now) {
            return Ok(SubscriptionStatus::Canceled);
        }
        if !self.ended(now) {
            return Ok(if self.on_trial(plan, now)? {
                SubscriptionStatus::Trial
            } else {
                SubscriptionStatus::Active
            });
        }
        Ok(if self.on_grace(plan, now)? {
            SubscriptionStatus::Grace
        } else {
            SubscriptionStatus::Ended
        })
    }

    /// Cancellation is effective immediately. Re-canceling moves the timestamp.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.canceled_at = Some(now);
    }

    /// Move `ends_at` later (or keep it). Moving it earlier is an invalid operation.
    pub fn postpone_end_date(&mut self, change: &EndDateChange) -> Result<DateTime<Utc>> {
        let new_end = change.resolve(self.ends_at)?;
        if new_end < self.ends_at {
            return Err(SubscriptionError::InvalidOperation(format!(
                "cannot postpone {} to {new_end}, which is before the current end {}",
                self.id, self.ends_at
            )));
        }
        self.ends_at = new_end;
        Ok(new_end)
    }

    /// Move `ends_at` earlier (or keep it), but never to or before `starts_at`.
    pub fn advance_end_date(&mut self, change: &EndDateChange) -> Result<DateTime<Utc>> {
        let new_end = change.resolve(self.ends_at)?;
        if new_end > self.ends_at {
            return Err(SubscriptionError::InvalidOperation(format!(
                "cannot advance {} to {new_end}, which is after the current end {}",
                self.id, self.ends_at
            )));
        }
        if new_end <= self.starts_at {
            return Err(SubscriptionError::InvalidArgument(format!(
                "end {new_end} of {} would not be after its start {}",
                self.id, self.starts_at
            )));
        }
        self.ends_at = new_end;
        Ok(new_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Interval, PeriodSpec};
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn plan() -> Plan {
        Plan::new("Pro", Amount::from_int(20))
            .with_trial(PeriodSpec::new(7, Interval::Day).unwrap())
            .with_grace(PeriodSpec::new(3, Interval::Day).unwrap())
    }

    fn subscription(plan: &Plan) -> Subscription {
        Subscription::start(
            SubscriberRef::new("user", "1"),
            plan,
            Some(utc(2024, 1, 1)),
            utc(2024, 1, 1),
        )
        .unwrap()
    }

    #[test]
    fn test_start_stamps_period_and_price() {
        let plan = plan();
        let sub = subscription(&plan);
        assert_eq!(sub.starts_at, utc(2024, 1, 1));
        assert_eq!(sub.ends_at, utc(2024, 2, 1));
        assert_eq!(sub.price, plan.price);
        assert_eq!(sub.plan_id, plan.id);
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_derived_windows() {
        let plan = plan();
        let sub = subscription(&plan);
        assert_eq!(sub.trial_ends_at(&plan).unwrap(), Some(utc(2024, 1, 8)));
        assert_eq!(sub.grace_ends_at(&plan).unwrap(), Some(utc(2024, 2, 4)));

        let bare = Plan::new("Bare", Amount::zero());
        assert_eq!(sub.trial_ends_at(&bare).unwrap(), None);
        assert_eq!(sub.grace_ends_at(&bare).unwrap(), None);
    }

    #[test]
    fn test_status_over_time() {
        let plan = plan();
        let sub = subscription(&plan);

        assert_eq!(sub.status(&plan, utc(2024, 1, 3)).unwrap(), SubscriptionStatus::Trial);
        assert_eq!(sub.status(&plan, utc(2024, 1, 20)).unwrap(), SubscriptionStatus::Active);
        assert_eq!(sub.status(&plan, utc(2024, 2, 2)).unwrap(), SubscriptionStatus::Grace);
        assert_eq!(sub.status(&plan, utc(2024, 2, 4)).unwrap(), SubscriptionStatus::Ended);

        assert!(sub.is_active(utc(2024, 1, 31)));
        assert!(!sub.is_active(utc(2024, 2, 1)));
        assert!(!sub.completely_ended(&plan, utc(2024, 2, 2)).unwrap());
        assert!(sub.completely_ended(&plan, utc(2024, 2, 5)).unwrap());
    }

    #[test]
    fn test_cancellation_overrides_grace() {
        let plan = plan();
        let mut sub = subscription(&plan);
        sub.cancel(utc(2024, 1, 20));

        assert!(!sub.canceled(utc(2024, 1, 19)));
        assert!(sub.canceled(utc(2024, 1, 20)));
        assert!(!sub.is_active(utc(2024, 1, 20)));
        assert!(!sub.on_grace(&plan, utc(2024, 2, 2)).unwrap());
        assert_eq!(sub.status(&plan, utc(2024, 2, 2)).unwrap(), SubscriptionStatus::Canceled);
    }

    #[test]
    fn test_postpone_enforces_direction() {
        let plan = plan();
        let mut sub = subscription(&plan);

        let end = sub
            .postpone_end_date(&EndDateChange::offset("+1 month").unwrap())
            .unwrap();
        assert_eq!(end, utc(2024, 3, 1));

        let err = sub
            .postpone_end_date(&EndDateChange::By(Duration::days(-1)))
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidOperation(_)));
        assert_eq!(sub.ends_at, utc(2024, 3, 1));
    }

    #[test]
    fn test_advance_enforces_direction_and_start() {
        let plan = plan();
        let mut sub = subscription(&plan);

        let end = sub
            .advance_end_date(&EndDateChange::At(utc(2024, 1, 15)))
            .unwrap();
        assert_eq!(end, utc(2024, 1, 15));

        let err = sub
            .advance_end_date(&EndDateChange::By(Duration::days(2)))
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidOperation(_)));

        let err = sub
            .advance_end_date(&EndDateChange::At(utc(2023, 12, 31)))
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidArgument(_)));
    }
}
