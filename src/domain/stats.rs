use crate::domain::models::Job;
use crate::domain::time_accounting::BusinessHours;
use crate::domain::views::rounded_ratio;
use chrono::Datelike;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonthCount {
    pub year: i32,
    pub month: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub drawing_count: usize,
    pub item_count: u32,
    pub total_minutes: u32,
    pub average_minutes_per_item: u32,
}

pub fn available_months(jobs: &[Job], hours: &BusinessHours) -> Vec<MonthCount> {
    let mut counts: BTreeMap<(i32, u32), usize> = BTreeMap::new();
    for job in jobs {
        if let Some(month) = completion_month(job, hours) {
            *counts.entry(month).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .rev()
        .map(|((year, month), count)| MonthCount { year, month, count })
        .collect()
}

pub fn monthly_summary(jobs: &[Job], year: i32, month: u32, hours: &BusinessHours) -> MonthlySummary {
    let mut drawings: HashSet<&str> = HashSet::new();
    let mut item_count: u32 = 0;
    let mut total_minutes: u32 = 0;

    for job in jobs
        .iter()
        .filter(|job| completion_month(job, hours) == Some((year, month)))
    {
        drawings.insert(job.drawing_number.as_str());
        item_count = item_count.saturating_add(job.item_quantity);
        total_minutes = total_minutes.saturating_add(job.total_time_minutes);
    }

    MonthlySummary {
        year,
        month,
        drawing_count: drawings.len(),
        item_count,
        total_minutes,
        average_minutes_per_item: rounded_ratio(total_minutes, item_count),
    }
}

fn completion_month(job: &Job, hours: &BusinessHours) -> Option<(i32, u32)> {
    let date = hours.local_date(job.completed_at?);
    Some((date.year(), date.month()))
}
