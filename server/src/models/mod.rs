pub mod actor;
pub mod genre;
pub mod performance;
pub mod play;
pub mod reservation;
pub mod theatre_hall;
pub mod user;

pub use actor::{Actor, ActorInput};
pub use genre::{Genre, GenreInput};
pub use performance::{
    Performance, PerformanceDetail, PerformanceFilter, PerformanceInput, PerformanceListItem,
    PerformanceStats, TakenSeat,
};
pub use play::{
    Play, PlayDetail, PlayFilter, PlayImage, PlayInput, PlayListItem, PlayRecord, PlaySummary,
};
pub use reservation::{
    NewTicket, Reservation, ReservationInput, ReservationListItem, ReservationRow, Ticket,
    TicketListItem, TicketRequest,
};
pub use theatre_hall::{TheatreHall, TheatreHallInput};
pub use user::{NewUser, User, UserProfile};

use thiserror::Error;

/// Maximum length of short text columns (`VARCHAR(255)`).
pub const MAX_NAME_LEN: usize = 255;

/// A request payload field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Trims `value` and checks it is non-empty and fits a `VARCHAR(255)` column.
pub(crate) fn required_name(field: &'static str, value: &str) -> Result<String, FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldError::new(field, "This field may not be blank."));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(FieldError::new(
            field,
            format!("Ensure this field has no more than {MAX_NAME_LEN} characters."),
        ));
    }
    Ok(trimmed.to_string())
}
