// nachweisbackup/src/scheduler/mod.rs
//! Cron trigger for scheduled backups.
//!
//! Expressions have six fields: second, minute, hour, day of month, month,
//! day of week. Numeric weekdays count from Sunday (0 and 7 are both
//! Sunday) and are rewritten to names before the expression reaches the
//! `cron` crate, which numbers weekdays differently.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::BackupEngine;
use crate::errors::{BackupError, FailureKind, Result};

const CRON_FIELDS: usize = 6;
const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parses a 6-field expression into a schedule.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != CRON_FIELDS {
        return Err(BackupError::ConfigInvalid(format!(
            "backup.scheduleCron '{}' must have {} fields (sec min hour day month weekday), found {}",
            expression,
            CRON_FIELDS,
            fields.len()
        )));
    }

    let weekday = normalize_weekdays(fields[5])?;
    let normalized = format!("{} {}", fields[..5].join(" "), weekday);
    Schedule::from_str(&normalized).map_err(|e| {
        BackupError::ConfigInvalid(format!(
            "backup.scheduleCron '{}' is not a valid cron expression: {}",
            expression, e
        ))
    })
}

/// Rewrites numeric weekdays (0/7 = Sunday) to names. Steps after `/` are kept.
fn normalize_weekdays(field: &str) -> Result<String> {
    let invalid = |detail: &str| {
        BackupError::ConfigInvalid(format!(
            "weekday field '{}' of backup.scheduleCron: {}",
            field, detail
        ))
    };

    let mut items = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let with_step = |base: String| match step {
            Some(step) => format!("{}/{}", base, step),
            None => base,
        };

        match base.split_once('-') {
            Some((start, end)) => {
                let start_day = weekday_number(start);
                let end_day = weekday_number(end);
                match (start_day, end_day) {
                    // Sunday as 7 closes a range that the crate can only express as two items.
                    (Some(s), Some(7)) if s != 7 => {
                        if step.is_some() {
                            return Err(invalid("stepped ranges ending in 7 are not supported"));
                        }
                        items.push(format!("{}-Sat", weekday_name(s, &invalid)?));
                        items.push("Sun".to_string());
                    }
                    _ => {
                        let start = translate_weekday(start, &invalid)?;
                        let end = translate_weekday(end, &invalid)?;
                        items.push(with_step(format!("{}-{}", start, end)));
                    }
                }
            }
            None => items.push(with_step(translate_weekday(base, &invalid)?)),
        }
    }
    Ok(items.join(","))
}

fn weekday_number(token: &str) -> Option<u32> {
    token.parse::<u32>().ok()
}

fn weekday_name(day: u32, invalid: &dyn Fn(&str) -> BackupError) -> Result<&'static str> {
    WEEKDAY_NAMES
        .get((day % 7) as usize)
        .copied()
        .filter(|_| day <= 7)
        .ok_or_else(|| invalid("weekday numbers must be between 0 and 7"))
}

fn translate_weekday(token: &str, invalid: &dyn Fn(&str) -> BackupError) -> Result<String> {
    match weekday_number(token) {
        Some(day) => weekday_name(day, invalid).map(str::to_string),
        None => Ok(token.to_string()),
    }
}

/// What one firing of the trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledOutcome {
    Skipped,
    Completed { archive: String, swept: usize },
    Failed(FailureKind),
}

impl BackupEngine {
    /// Body of the cron trigger: compose an archive, then apply retention.
    /// Nothing happens while scheduled backups are disabled.
    pub async fn run_scheduled(&self) -> ScheduledOutcome {
        if !self.config().enabled {
            info!("scheduled backups are disabled, skipping");
            return ScheduledOutcome::Skipped;
        }

        let _guard = match self.try_lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "scheduled backup not started");
                return ScheduledOutcome::Failed(e.kind());
            }
        };

        match self.compose_archive().await {
            Ok(result) => {
                let swept = self.cleanup_old_backups().len();
                info!(archive = %result.file_name, swept, "scheduled backup finished");
                ScheduledOutcome::Completed {
                    archive: result.file_name,
                    swept,
                }
            }
            Err(e) => {
                error!(kind = %e.kind(), phase = ?e.phase(), error = %e, "scheduled backup failed");
                ScheduledOutcome::Failed(e.kind())
            }
        }
    }
}

/// Registers the trigger and runs it until the engine channel closes.
///
/// Every new engine sent through the channel re-registers the trigger with
/// that engine's expression. The expression of the initial engine is
/// validated here, so a bad one fails startup.
pub fn spawn(mut engines: watch::Receiver<Arc<BackupEngine>>) -> Result<JoinHandle<()>> {
    parse_schedule(&engines.borrow().config().schedule_cron)?;

    Ok(tokio::spawn(async move {
        let mut last_fire: Option<DateTime<Local>> = None;
        loop {
            let engine = engines.borrow_and_update().clone();
            let next = match parse_schedule(&engine.config().schedule_cron) {
                Ok(schedule) => {
                    let from = last_fire.map_or_else(Local::now, |last| last.max(Local::now()));
                    schedule.after(&from).next()
                }
                Err(e) => {
                    error!(error = %e, "backup trigger not registered");
                    None
                }
            };

            let Some(next) = next else {
                if engines.changed().await.is_err() {
                    return;
                }
                continue;
            };
            info!(next = %next.to_rfc3339(), cron = %engine.config().schedule_cron, "next scheduled backup");
            let delay = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    last_fire = Some(next);
                    engine.run_scheduled().await;
                }
                changed = engines.changed() => {
                    if changed.is_err() {
                        info!("engine channel closed, stopping scheduler");
                        return;
                    }
                    info!("configuration changed, re-registering backup trigger");
                }
            }
        }
    }))
}
