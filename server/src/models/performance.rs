use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use super::{PlayDetail, TheatreHall};
use crate::services::availability::{tickets_available, AvailabilityError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Performance {
    pub id: i64,
    #[serde(rename = "play")]
    pub play_id: i64,
    #[serde(rename = "theatre_hall")]
    pub theatre_hall_id: i64,
    pub show_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceInput {
    pub play: i64,
    pub theatre_hall: i64,
    pub show_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceFilter {
    /// Case-insensitive substring of the play title.
    pub play: Option<String>,
    /// Restricts the listing to these performance ids.
    pub ids: Option<Vec<i64>>,
}

impl PerformanceFilter {
    pub fn by_play_title(play: Option<&str>) -> Self {
        Self {
            play: play
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ids: None,
        }
    }

    pub fn by_ids(ids: Vec<i64>) -> Self {
        Self {
            play: None,
            ids: Some(ids),
        }
    }

    pub fn matches(&self, performance_id: i64, play_title: &str) -> bool {
        let title_ok = self.play.as_ref().map_or(true, |needle| {
            play_title.to_lowercase().contains(&needle.to_lowercase())
        });
        let id_ok = self
            .ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&performance_id));
        title_ok && id_ok
    }
}

/// One performance joined with its play title, hall and number of tickets sold.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PerformanceStats {
    pub id: i64,
    pub play_id: i64,
    pub theatre_hall_id: i64,
    pub show_time: DateTime<Utc>,
    pub play_title: String,
    pub hall_name: String,
    pub rows: i32,
    pub seats_in_row: i32,
    pub sold: i64,
}

impl PerformanceStats {
    pub fn capacity(&self) -> i64 {
        i64::from(self.rows) * i64::from(self.seats_in_row)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceListItem {
    pub id: i64,
    pub play: String,
    pub theatre_hall: String,
    pub show_time: DateTime<Utc>,
    pub tickets_available: i64,
}

impl TryFrom<PerformanceStats> for PerformanceListItem {
    type Error = AvailabilityError;

    fn try_from(stats: PerformanceStats) -> Result<Self, Self::Error> {
        let tickets_available = tickets_available(stats.id, stats.capacity(), stats.sold)?;
        Ok(Self {
            id: stats.id,
            play: stats.play_title,
            theatre_hall: stats.hall_name,
            show_time: stats.show_time,
            tickets_available,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TakenSeat {
    pub row: i32,
    pub seat: i32,
}

impl<'r> FromRow<'r, PgRow> for TakenSeat {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            row: row.try_get("row")?,
            seat: row.try_get("seat")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceDetail {
    pub id: i64,
    pub play: PlayDetail,
    pub theatre_hall: TheatreHall,
    pub show_time: DateTime<Utc>,
    pub taken_seats: Vec<TakenSeat>,
}
