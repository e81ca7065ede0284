//! The scheduler: cron, interval, and one-shot triggers that launch
//! processes through the supervisor.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule as CronExpr;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::descriptor::ProcessSpec;
use crate::error::{Result, SupervisorError};
use crate::event::EventKind;
use crate::supervisor::Supervisor;

const MISSED_FIRE_GRACE: Duration = Duration::from_secs(60);

/// The trigger dialect for a schedule.
#[derive(Debug, Clone)]
pub enum Kind {
    Cron(String),
    Interval(Duration),
    Once(DateTime<Utc>),
}

impl Kind {
    pub fn parse(kind: &str, expression: &str) -> std::result::Result<Self, String> {
        match kind {
            "cron" => {
                to_cron_schedule(expression)?;
                Ok(Kind::Cron(expression.to_string()))
            }
            "interval" => parse_interval(expression).map(Kind::Interval),
            "once" => DateTime::parse_from_rfc3339(expression)
                .map(|dt| Kind::Once(dt.with_timezone(&Utc)))
                .map_err(|e| format!("invalid ISO-8601 timestamp: {e}")),
            other => Err(format!("unknown schedule kind `{other}`")),
        }
    }
}

/// A cron crate `Schedule` wants 6 or 7 fields (with seconds); the wire
/// dialect is the familiar 5-field form, so a leading `0` seconds field is
/// prepended before handing it to the library.
fn to_cron_schedule(expression: &str) -> std::result::Result<CronExpr, String> {
    let with_seconds = format!("0 {expression}");
    CronExpr::from_str(&with_seconds).map_err(|e| format!("invalid cron expression: {e}"))
}

fn parse_interval(expression: &str) -> std::result::Result<Duration, String> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for c in expression.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().map_err(|_| format!("invalid interval `{expression}`"))?;
        digits.clear();
        let unit = match c {
            's' => Duration::from_secs(n),
            'm' => Duration::from_secs(n * 60),
            'h' => Duration::from_secs(n * 3600),
            'd' => Duration::from_secs(n * 86_400),
            other => return Err(format!("unknown interval unit `{other}`")),
        };
        total += unit;
    }
    if !digits.is_empty() || total == Duration::ZERO {
        return Err(format!("invalid interval `{expression}`"));
    }
    Ok(total)
}

/// The launch template a schedule fires.
#[derive(Debug, Clone)]
pub struct Target {
    pub spec: ProcessSpec,
}

#[derive(Debug, Clone)]
pub struct ScheduleRecord {
    pub name: String,
    pub kind: Kind,
    pub target: Target,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

impl ScheduleRecord {
    fn compute_next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            Kind::Cron(expr) => to_cron_schedule(expr).ok()?.after(&after).next(),
            Kind::Interval(dur) => Some(after + chrono::Duration::from_std(*dur).ok()?),
            Kind::Once(at) => {
                if *at > after {
                    Some(*at)
                } else {
                    None
                }
            }
        }
    }
}

/// Owns the trigger set and fires launch requests against a [`Supervisor`].
pub struct Scheduler<C: Clock> {
    supervisor: Arc<Supervisor<C>>,
    schedules: tokio::sync::Mutex<HashMap<String, ScheduleRecord>>,
    cancel: CancellationToken,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(supervisor: Arc<Supervisor<C>>) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            schedules: tokio::sync::Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub async fn add(&self, name: &str, kind: Kind, target: Target, now: DateTime<Utc>) -> Result<()> {
        let mut record = ScheduleRecord {
            name: name.to_string(),
            kind,
            target,
            enabled: true,
            last_run: None,
            next_run: None,
            run_count: 0,
        };
        record.next_run = record.compute_next(now);
        self.schedules.lock().await.insert(name.to_string(), record);
        Ok(())
    }

    pub async fn enable(&self, name: &str, now: DateTime<Utc>) -> Result<()> {
        let mut schedules = self.schedules.lock().await;
        let record = schedules.get_mut(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        record.enabled = true;
        record.next_run = record.compute_next(now);
        Ok(())
    }

    pub async fn disable(&self, name: &str) -> Result<()> {
        let mut schedules = self.schedules.lock().await;
        let record = schedules.get_mut(name).ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
        record.enabled = false;
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        self.schedules
            .lock()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub async fn list(&self) -> Vec<ScheduleRecord> {
        self.schedules.lock().await.values().cloned().collect()
    }

    /// Runs the firing loop until cancelled. Intended to be spawned as its
    /// own task by the owner of this `Scheduler`.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tick.tick() => self.fire_due(Utc::now()).await,
                _ = self.cancel.cancelled() => {
                    info!("scheduler cancelled");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn fire_due(self: &Arc<Self>, now: DateTime<Utc>) {
        // Missed (beyond grace) schedules still need `next_run` advanced so
        // they don't freeze permanently once they fall far enough behind;
        // they just skip the launch side effect `fire_one` performs.
        let mut due: Vec<(String, Target, DateTime<Utc>)> = Vec::new();
        let mut missed: Vec<String> = Vec::new();
        {
            let schedules = self.schedules.lock().await;
            for r in schedules.values().filter(|r| r.enabled) {
                let Some(next) = r.next_run else { continue };
                if next > now {
                    continue;
                }
                let within_grace = now.signed_duration_since(next).num_seconds()
                    <= MISSED_FIRE_GRACE.as_secs() as i64;
                if within_grace {
                    due.push((r.name.clone(), r.target.clone(), next));
                } else {
                    missed.push(r.name.clone());
                }
            }
        }

        if !missed.is_empty() {
            let mut schedules = self.schedules.lock().await;
            for name in missed {
                if let Some(record) = schedules.get_mut(&name) {
                    let scheduled_for = record.next_run;
                    record.next_run = scheduled_for.and_then(|at| record.compute_next(at));
                    warn!(schedule = %name, "missed fire beyond grace window, skipping launch");
                }
            }
        }

        for (name, target, scheduled_for) in due {
            self.fire_one(&name, target, now, scheduled_for).await;
        }
    }

    async fn fire_one(
        self: &Arc<Self>,
        name: &str,
        target: Target,
        now: DateTime<Utc>,
        scheduled_for: DateTime<Utc>,
    ) {
        let launched_as = format!("{name}-{}", now.format("%Y%m%d-%H%M%S"));
        let result = self.supervisor.start(&launched_as, target.spec.clone()).await;
        if let Err(e) = &result {
            warn!(schedule = name, error = %e, "scheduled launch failed");
        } else {
            self.supervisor.events().publish(EventKind::ScheduleFired {
                schedule: name.to_string(),
                launched_as: launched_as.clone(),
            });
        }

        let mut schedules = self.schedules.lock().await;
        if let Some(record) = schedules.get_mut(name) {
            record.last_run = Some(now);
            record.run_count += 1;
            // Recompute from the schedule's own prior scheduled time, not
            // the actual firing wall-clock time, so interval schedules are
            // fixed-rate and don't accumulate drift under scheduling jitter.
            record.next_run = record.compute_next(scheduled_for);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::descriptor::ProcessSpec;
    use crate::event::EventBus;
    use std::collections::BTreeMap;

    fn scheduler() -> Arc<Scheduler<SystemClock>> {
        let supervisor = Supervisor::new(Arc::new(SystemClock), Arc::new(EventBus::new()));
        Scheduler::new(supervisor)
    }

    fn target() -> Target {
        Target {
            spec: ProcessSpec {
                command: "true".to_string(),
                args: Vec::new(),
                working_dir: None,
                env: BTreeMap::new(),
                group: None,
                policy: None,
            },
        }
    }

    #[tokio::test]
    async fn missed_fire_beyond_grace_advances_next_run_without_launching() {
        let sched = scheduler();
        let now = Utc::now();
        let missed_by = chrono::Duration::seconds(MISSED_FIRE_GRACE.as_secs() as i64 + 30);
        let stale_next_run = now - missed_by;
        sched.add("overdue", Kind::Interval(Duration::from_secs(60)), target(), stale_next_run).await.unwrap();
        // `add` schedules relative to `stale_next_run`; force it back so the
        // gap exceeds the grace window as of `now`.
        {
            let mut schedules = sched.schedules.lock().await;
            schedules.get_mut("overdue").unwrap().next_run = Some(stale_next_run);
        }

        sched.fire_due(now).await;

        let schedules = sched.list().await;
        let record = schedules.iter().find(|r| r.name == "overdue").unwrap();
        // next_run must have moved forward from the stale value (never
        // frozen), and the skipped firing must not have counted as a run.
        assert!(record.next_run.unwrap() > stale_next_run);
        assert_eq!(record.run_count, 0);
        assert!(record.last_run.is_none());
    }

    #[tokio::test]
    async fn fixed_rate_interval_recomputes_from_scheduled_time_not_now() {
        let sched = scheduler();
        let now = Utc::now();
        let due_at = now - chrono::Duration::seconds(5);
        sched.add("ticker", Kind::Interval(Duration::from_secs(60)), target(), due_at).await.unwrap();
        {
            let mut schedules = sched.schedules.lock().await;
            schedules.get_mut("ticker").unwrap().next_run = Some(due_at);
        }

        sched.fire_due(now).await;

        let schedules = sched.list().await;
        let record = schedules.iter().find(|r| r.name == "ticker").unwrap();
        // Fixed-rate: the next firing is `due_at + 60s`, not `now + 60s`.
        // Firing 5s late must not shift the schedule's cadence forward.
        assert_eq!(record.next_run.unwrap(), due_at + chrono::Duration::seconds(60));
        assert_eq!(record.run_count, 1);
    }

    #[test]
    fn interval_parses_single_unit() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("5m").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn interval_parses_concatenated_units() {
        assert_eq!(parse_interval("1h30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn interval_rejects_garbage() {
        assert!(parse_interval("nope").is_err());
        assert!(parse_interval("").is_err());
        assert!(parse_interval("10x").is_err());
    }

    #[test]
    fn cron_expression_validates_five_fields() {
        assert!(Kind::parse("cron", "*/5 * * * *").is_ok());
        assert!(Kind::parse("cron", "not a cron").is_err());
    }

    #[test]
    fn once_requires_rfc3339() {
        assert!(Kind::parse("once", "2026-08-01T00:00:00Z").is_ok());
        assert!(Kind::parse("once", "tomorrow").is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Kind::parse("weekly", "1").is_err());
    }
}
