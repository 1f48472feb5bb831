use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SeatError {
    #[error("Row must be in range [1, {rows}], not {row}.")]
    RowOutOfRange { row: i32, rows: i32 },

    #[error("Seat must be in range [1, {seats_in_row}], not {seat}.")]
    SeatOutOfRange { seat: i32, seats_in_row: i32 },
}

/// Checks a (row, seat) coordinate against a hall's dimensions. Both are 1-based.
pub fn validate_seat(row: i32, seat: i32, rows: i32, seats_in_row: i32) -> Result<(), SeatError> {
    if !(1..=rows).contains(&row) {
        return Err(SeatError::RowOutOfRange { row, rows });
    }
    if !(1..=seats_in_row).contains(&seat) {
        return Err(SeatError::SeatOutOfRange { seat, seats_in_row });
    }
    Ok(())
}
