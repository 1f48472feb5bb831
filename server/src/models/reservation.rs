use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use super::PerformanceListItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub row: i32,
    pub seat: i32,
    #[serde(rename = "performance")]
    pub performance_id: i64,
}

// Written by hand: the derive binds a local per field, and a field named
// `row` shadows the row being decoded.
impl<'r> FromRow<'r, PgRow> for Ticket {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            row: row.try_get("row")?,
            seat: row.try_get("seat")?,
            performance_id: row.try_get("performance_id")?,
        })
    }
}

/// A ticket that has passed validation and is ready to be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewTicket {
    pub row: i32,
    pub seat: i32,
    pub performance_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TicketRequest {
    pub row: i32,
    pub seat: i32,
    pub performance: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationInput {
    pub tickets: Vec<TicketRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ReservationRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_id: i64,
}

/// A reservation with the tickets it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub tickets: Vec<Ticket>,
}

impl Reservation {
    pub fn from_row(row: ReservationRow, tickets: Vec<Ticket>) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            user_id: row.user_id,
            tickets,
        }
    }

    pub fn performance_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.tickets.iter().map(|t| t.performance_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketListItem {
    pub id: i64,
    pub row: i32,
    pub seat: i32,
    pub performance: PerformanceListItem,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationListItem {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub tickets: Vec<TicketListItem>,
}
