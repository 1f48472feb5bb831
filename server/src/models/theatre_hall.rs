use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{required_name, FieldError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TheatreHall {
    pub id: i64,
    pub name: String,
    pub rows: i32,
    pub seats_in_row: i32,
}

impl TheatreHall {
    /// Total number of seats: rows × seats_in_row.
    pub fn capacity(&self) -> i64 {
        i64::from(self.rows) * i64::from(self.seats_in_row)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TheatreHallInput {
    pub name: String,
    pub rows: i32,
    pub seats_in_row: i32,
}

impl TheatreHallInput {
    pub fn normalized(&self) -> Result<Self, FieldError> {
        let name = required_name("name", &self.name)?;
        if self.rows < 1 {
            return Err(FieldError::new(
                "rows",
                "Ensure this value is greater than or equal to 1.",
            ));
        }
        if self.seats_in_row < 1 {
            return Err(FieldError::new(
                "seats_in_row",
                "Ensure this value is greater than or equal to 1.",
            ));
        }
        Ok(Self {
            name,
            rows: self.rows,
            seats_in_row: self.seats_in_row,
        })
    }
}
