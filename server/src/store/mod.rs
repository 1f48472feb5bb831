//! Data access for the theatre domain.
//!
//! Each concern gets its own repository trait; [`TheatreStore`] bundles them so
//! handlers can hold a single `Arc<dyn TheatreStore>`. Two backends exist:
//! [`PgStore`] over PostgreSQL and [`InMemoryStore`] for tests and local demos.
//! Both enforce the same uniqueness and cascade rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Actor, ActorInput, Genre, GenreInput, NewTicket, NewUser, Performance, PerformanceFilter,
    PerformanceInput, PerformanceStats, Play, PlayFilter, PlayInput, PlayRecord, Reservation,
    TakenSeat, TheatreHall, TheatreHallInput, User,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} with {field} '{value}' already exists")]
    Duplicate {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{field} refers to a {entity} that does not exist")]
    InvalidReference {
        entity: &'static str,
        field: &'static str,
    },

    #[error("row {row}, seat {seat} is already taken for performance {performance_id}")]
    SeatTaken {
        row: i32,
        seat: i32,
        performance_id: i64,
    },

    /// A hall or performance change that would strand sold tickets.
    #[error("{field}: {message}")]
    SoldSeatsOutside { field: &'static str, message: String },

    /// The hall shrank between seat validation and the ticket insert.
    #[error("row {row}, seat {seat} is outside the {rows}x{seats_in_row} hall of performance {performance_id}")]
    SeatOutOfBounds {
        row: i32,
        seat: i32,
        performance_id: i64,
        rows: i32,
        seats_in_row: i32,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store state lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Checks that the highest sold `(row, seat)` still fits `rows` x `seats_in_row`.
///
/// Hall updates report the offending dimension; performance moves pass
/// `Some("theatre_hall")` to report the reference instead.
pub(crate) fn ensure_sold_seats_fit(
    max_sold: (i32, i32),
    rows: i32,
    seats_in_row: i32,
    field: Option<&'static str>,
) -> StoreResult<()> {
    let (max_row, max_seat) = max_sold;
    if max_row > rows {
        return Err(StoreError::SoldSeatsOutside {
            field: field.unwrap_or("rows"),
            message: format!(
                "Tickets are sold in row {max_row}; the hall needs at least {max_row} rows."
            ),
        });
    }
    if max_seat > seats_in_row {
        return Err(StoreError::SoldSeatsOutside {
            field: field.unwrap_or("seats_in_row"),
            message: format!(
                "Tickets are sold for seat {max_seat}; the hall needs at least {max_seat} seats in a row."
            ),
        });
    }
    Ok(())
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_genres(&self) -> StoreResult<Vec<Genre>>;
    async fn get_genre(&self, id: i64) -> StoreResult<Genre>;
    /// Fails with [`StoreError::Duplicate`] when the name is taken.
    async fn create_genre(&self, input: &GenreInput) -> StoreResult<Genre>;
    async fn update_genre(&self, id: i64, input: &GenreInput) -> StoreResult<Genre>;
    async fn delete_genre(&self, id: i64) -> StoreResult<()>;

    async fn list_actors(&self) -> StoreResult<Vec<Actor>>;
    async fn get_actor(&self, id: i64) -> StoreResult<Actor>;
    async fn create_actor(&self, input: &ActorInput) -> StoreResult<Actor>;
    async fn update_actor(&self, id: i64, input: &ActorInput) -> StoreResult<Actor>;
    async fn delete_actor(&self, id: i64) -> StoreResult<()>;

    /// Plays matching `filter`, distinct and ordered by id.
    async fn list_plays(&self, filter: &PlayFilter) -> StoreResult<Vec<PlayRecord>>;
    async fn get_play(&self, id: i64) -> StoreResult<PlayRecord>;
    /// Fails with [`StoreError::InvalidReference`] when a genre or actor id is unknown.
    async fn create_play(&self, input: &PlayInput) -> StoreResult<PlayRecord>;
    async fn update_play(&self, id: i64, input: &PlayInput) -> StoreResult<PlayRecord>;
    async fn delete_play(&self, id: i64) -> StoreResult<()>;
    async fn set_play_image(&self, id: i64, image: &str) -> StoreResult<Play>;
}

#[async_trait]
pub trait VenueRepository: Send + Sync {
    async fn list_halls(&self) -> StoreResult<Vec<TheatreHall>>;
    async fn get_hall(&self, id: i64) -> StoreResult<TheatreHall>;
    async fn create_hall(&self, input: &TheatreHallInput) -> StoreResult<TheatreHall>;
    async fn update_hall(&self, id: i64, input: &TheatreHallInput) -> StoreResult<TheatreHall>;
    /// Cascades to the hall's performances and their tickets.
    async fn delete_hall(&self, id: i64) -> StoreResult<()>;

    /// Performances matching `filter` with their sold ticket counts, ordered by id.
    async fn list_performances(
        &self,
        filter: &PerformanceFilter,
    ) -> StoreResult<Vec<PerformanceStats>>;
    async fn get_performance(&self, id: i64) -> StoreResult<Performance>;
    /// The hall a performance takes place in, or `None` if the performance does not exist.
    async fn find_performance_hall(&self, performance_id: i64) -> StoreResult<Option<TheatreHall>>;
    async fn taken_seats(&self, performance_id: i64) -> StoreResult<Vec<TakenSeat>>;
    async fn create_performance(&self, input: &PerformanceInput) -> StoreResult<Performance>;
    async fn update_performance(
        &self,
        id: i64,
        input: &PerformanceInput,
    ) -> StoreResult<Performance>;
    /// Cascades to the performance's tickets.
    async fn delete_performance(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Inserts a reservation and all of its tickets as one atomic unit.
    ///
    /// The first ticket whose (row, seat, performance) is already sold aborts
    /// the whole write with [`StoreError::SeatTaken`] and nothing is persisted.
    /// A ticket for a missing performance fails with [`StoreError::NotFound`]
    /// naming that performance.
    async fn create_reservation(
        &self,
        user_id: i64,
        tickets: &[NewTicket],
    ) -> StoreResult<Reservation>;
    /// The user's reservations, newest first.
    async fn list_reservations(&self, user_id: i64) -> StoreResult<Vec<Reservation>>;
    /// Reservations owned by another user are reported as not found.
    async fn get_reservation(&self, user_id: i64, id: i64) -> StoreResult<Reservation>;
    async fn delete_reservation(&self, user_id: i64, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &NewUser) -> StoreResult<User>;
    async fn get_user(&self, id: i64) -> StoreResult<User>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn update_user(&self, id: i64, email: &str, password_hash: &str) -> StoreResult<User>;
    /// Stores a token hash valid until `expires_at`; drops the user's expired tokens.
    async fn store_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// Expired tokens resolve to `None`.
    async fn find_user_by_token(&self, token_hash: &str) -> StoreResult<Option<User>>;
    async fn revoke_token(&self, token_hash: &str) -> StoreResult<()>;
}

pub trait TheatreStore:
    CatalogRepository + VenueRepository + ReservationRepository + UserRepository
{
}

impl<T> TheatreStore for T where
    T: CatalogRepository + VenueRepository + ReservationRepository + UserRepository
{
}
