//! Reservation allocation: validates every requested seat and persists the
//! reservation with all of its tickets, or nothing at all.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{info, warn};

use super::seat::{validate_seat, SeatError};
use crate::models::{NewTicket, Reservation, TheatreHall, TicketRequest};
use crate::store::{ReservationRepository, StoreError, VenueRepository};

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("A reservation needs at least one ticket.")]
    EmptyTicketSet,

    #[error("Performance {performance} does not exist.")]
    PerformanceNotFound { index: usize, performance: i64 },

    #[error("Row must be in range [1, {rows}], not {row}.")]
    RowOutOfRange { index: usize, row: i32, rows: i32 },

    #[error("Seat must be in range [1, {seats_in_row}], not {seat}.")]
    SeatOutOfRange {
        index: usize,
        seat: i32,
        seats_in_row: i32,
    },

    #[error("Row {row}, seat {seat} is already taken for performance {performance}.")]
    SeatAlreadyTaken {
        index: usize,
        row: i32,
        seat: i32,
        performance: i64,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl AllocationError {
    fn invalid_seat(index: usize, err: SeatError) -> Self {
        match err {
            SeatError::RowOutOfRange { row, rows } => Self::RowOutOfRange { index, row, rows },
            SeatError::SeatOutOfRange { seat, seats_in_row } => Self::SeatOutOfRange {
                index,
                seat,
                seats_in_row,
            },
        }
    }

    /// Position of the offending ticket in the request, when there is one.
    pub fn ticket_index(&self) -> Option<usize> {
        match self {
            Self::PerformanceNotFound { index, .. }
            | Self::RowOutOfRange { index, .. }
            | Self::SeatOutOfRange { index, .. }
            | Self::SeatAlreadyTaken { index, .. } => Some(*index),
            Self::EmptyTicketSet | Self::Store(_) => None,
        }
    }

    /// Name of the ticket field the error is about.
    pub fn field(&self) -> &'static str {
        match self {
            Self::EmptyTicketSet | Self::Store(_) => "tickets",
            Self::PerformanceNotFound { .. } => "performance",
            Self::RowOutOfRange { .. } => "row",
            Self::SeatOutOfRange { .. } => "seat",
            Self::SeatAlreadyTaken { .. } => "seat",
        }
    }
}

/// Creates a reservation owned by `user_id` holding one ticket per request.
///
/// Requests are checked in order: the performance must exist and the seat must
/// lie inside its hall. A seat requested twice in the same call is rejected
/// before storage is touched. Cross-request conflicts are detected by the store
/// at insert time, so two concurrent calls for one seat never both succeed.
pub async fn create_reservation<S>(
    store: &S,
    user_id: i64,
    requests: &[TicketRequest],
) -> Result<Reservation, AllocationError>
where
    S: VenueRepository + ReservationRepository + ?Sized,
{
    if requests.is_empty() {
        return Err(AllocationError::EmptyTicketSet);
    }

    let mut halls: HashMap<i64, TheatreHall> = HashMap::new();
    let mut requested: HashSet<NewTicket> = HashSet::with_capacity(requests.len());
    let mut tickets = Vec::with_capacity(requests.len());

    for (index, request) in requests.iter().enumerate() {
        if !halls.contains_key(&request.performance) {
            let hall = store
                .find_performance_hall(request.performance)
                .await
                .map_err(AllocationError::Store)?
                .ok_or(AllocationError::PerformanceNotFound {
                    index,
                    performance: request.performance,
                })?;
            halls.insert(request.performance, hall);
        }
        let hall = &halls[&request.performance];

        validate_seat(request.row, request.seat, hall.rows, hall.seats_in_row)
            .map_err(|e| AllocationError::invalid_seat(index, e))?;

        let ticket = NewTicket {
            row: request.row,
            seat: request.seat,
            performance_id: request.performance,
        };
        if !requested.insert(ticket) {
            return Err(AllocationError::SeatAlreadyTaken {
                index,
                row: ticket.row,
                seat: ticket.seat,
                performance: ticket.performance_id,
            });
        }
        tickets.push(ticket);
    }

    let position = |performance_id: i64, row: Option<(i32, i32)>| {
        tickets
            .iter()
            .position(|t| {
                t.performance_id == performance_id
                    && row.map_or(true, |(row, seat)| t.row == row && t.seat == seat)
            })
            .unwrap_or(0)
    };

    let reservation = store
        .create_reservation(user_id, &tickets)
        .await
        .map_err(|e| match e {
            StoreError::SeatTaken {
                row,
                seat,
                performance_id,
            } => {
                warn!(user_id, row, seat, performance_id, "Seat already taken");
                AllocationError::SeatAlreadyTaken {
                    index: position(performance_id, Some((row, seat))),
                    row,
                    seat,
                    performance: performance_id,
                }
            }
            // The performance was deleted between validation and insert.
            StoreError::NotFound {
                entity: "performance",
                id,
            } => AllocationError::PerformanceNotFound {
                index: position(id, None),
                performance: id,
            },
            // The hall was resized between validation and insert.
            StoreError::SeatOutOfBounds {
                row,
                seat,
                performance_id,
                rows,
                seats_in_row,
            } => match validate_seat(row, seat, rows, seats_in_row) {
                Err(err) => {
                    AllocationError::invalid_seat(position(performance_id, Some((row, seat))), err)
                }
                Ok(()) => AllocationError::Store(StoreError::SeatOutOfBounds {
                    row,
                    seat,
                    performance_id,
                    rows,
                    seats_in_row,
                }),
            },
            other => AllocationError::Store(other),
        })?;

    info!(
        user_id,
        reservation_id = reservation.id,
        tickets = reservation.tickets.len(),
        "Reservation created"
    );
    Ok(reservation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Performance, PerformanceFilter, PerformanceInput, PerformanceStats, PlayInput, TakenSeat,
        TheatreHallInput,
    };
    use crate::store::{CatalogRepository, InMemoryStore, StoreResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;

    async fn setup(rows: i32, seats_in_row: i32) -> (InMemoryStore, i64) {
        let store = InMemoryStore::new();
        let play = store
            .create_play(&PlayInput {
                title: "The Cherry Orchard".to_string(),
                description: "Chekhov".to_string(),
                genres: vec![],
                actors: vec![],
            })
            .await
            .unwrap();
        let hall = store
            .create_hall(&TheatreHallInput {
                name: "Small".to_string(),
                rows,
                seats_in_row,
            })
            .await
            .unwrap();
        let performance = store
            .create_performance(&PerformanceInput {
                play: play.play.id,
                theatre_hall: hall.id,
                show_time: Utc::now(),
            })
            .await
            .unwrap();
        (store, performance.id)
    }

    fn request(row: i32, seat: i32, performance: i64) -> TicketRequest {
        TicketRequest {
            row,
            seat,
            performance,
        }
    }

    #[tokio::test]
    async fn test_creates_reservation_with_all_tickets() {
        let (store, p) = setup(10, 10).await;
        let reservation = create_reservation(&store, 7, &[request(1, 1, p), request(1, 2, p)])
            .await
            .unwrap();

        assert_eq!(reservation.user_id, 7);
        assert_eq!(reservation.tickets.len(), 2);
        assert_eq!(store.taken_seats(p).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_request_rejected() {
        let (store, _) = setup(10, 10).await;
        let err = create_reservation(&store, 1, &[]).await.unwrap_err();
        assert!(matches!(err, AllocationError::EmptyTicketSet));
    }

    #[tokio::test]
    async fn test_unknown_performance() {
        let (store, p) = setup(10, 10).await;
        let err = create_reservation(&store, 1, &[request(1, 1, p), request(1, 1, p + 100)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::PerformanceNotFound { index: 1, .. }
        ));
        assert!(store.taken_seats(p).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_aborts_whole_reservation() {
        let (store, p) = setup(5, 8).await;

        let err = create_reservation(&store, 1, &[request(1, 1, p), request(6, 1, p)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::RowOutOfRange {
                index: 1,
                row: 6,
                rows: 5
            }
        ));

        let err = create_reservation(&store, 1, &[request(2, 9, p)])
            .await
            .unwrap_err();
        assert_eq!(err.field(), "seat");

        assert!(store.list_reservations(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_within_request_persists_nothing() {
        let (store, p) = setup(10, 10).await;
        let err = create_reservation(&store, 1, &[request(1, 1, p), request(1, 1, p)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AllocationError::SeatAlreadyTaken { index: 1, .. }
        ));
        assert!(store.list_reservations(1).await.unwrap().is_empty());
        assert!(store.taken_seats(p).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seat_sold_earlier_is_rejected() {
        let (store, p) = setup(10, 10).await;
        create_reservation(&store, 1, &[request(2, 5, p)])
            .await
            .unwrap();

        let err = create_reservation(&store, 2, &[request(3, 3, p), request(2, 5, p)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::SeatAlreadyTaken {
                index: 1,
                row: 2,
                seat: 5,
                ..
            }
        ));
        assert!(store.list_reservations(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_one_seat() {
        let (store, p) = setup(10, 10).await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|user| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    create_reservation(store.as_ref(), user, &[request(2, 5, p)]).await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert!(matches!(err, AllocationError::SeatAlreadyTaken { .. })),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.taken_seats(p).await.unwrap().len(), 1);
    }

    /// Reports `hall` for every performance in `stale`, whatever the store
    /// holds, so the store sees requests validated against outdated halls.
    struct StaleHalls {
        inner: InMemoryStore,
        stale: Vec<i64>,
        hall: TheatreHall,
    }

    #[async_trait]
    impl VenueRepository for StaleHalls {
        async fn list_halls(&self) -> StoreResult<Vec<TheatreHall>> {
            self.inner.list_halls().await
        }
        async fn get_hall(&self, id: i64) -> StoreResult<TheatreHall> {
            self.inner.get_hall(id).await
        }
        async fn create_hall(&self, input: &TheatreHallInput) -> StoreResult<TheatreHall> {
            self.inner.create_hall(input).await
        }
        async fn update_hall(&self, id: i64, input: &TheatreHallInput) -> StoreResult<TheatreHall> {
            self.inner.update_hall(id, input).await
        }
        async fn delete_hall(&self, id: i64) -> StoreResult<()> {
            self.inner.delete_hall(id).await
        }
        async fn list_performances(
            &self,
            filter: &PerformanceFilter,
        ) -> StoreResult<Vec<PerformanceStats>> {
            self.inner.list_performances(filter).await
        }
        async fn get_performance(&self, id: i64) -> StoreResult<Performance> {
            self.inner.get_performance(id).await
        }
        async fn find_performance_hall(&self, performance_id: i64) -> StoreResult<Option<TheatreHall>> {
            if self.stale.contains(&performance_id) {
                return Ok(Some(self.hall.clone()));
            }
            self.inner.find_performance_hall(performance_id).await
        }
        async fn taken_seats(&self, performance_id: i64) -> StoreResult<Vec<TakenSeat>> {
            self.inner.taken_seats(performance_id).await
        }
        async fn create_performance(&self, input: &PerformanceInput) -> StoreResult<Performance> {
            self.inner.create_performance(input).await
        }
        async fn update_performance(
            &self,
            id: i64,
            input: &PerformanceInput,
        ) -> StoreResult<Performance> {
            self.inner.update_performance(id, input).await
        }
        async fn delete_performance(&self, id: i64) -> StoreResult<()> {
            self.inner.delete_performance(id).await
        }
    }

    #[async_trait]
    impl ReservationRepository for StaleHalls {
        async fn create_reservation(
            &self,
            user_id: i64,
            tickets: &[NewTicket],
        ) -> StoreResult<Reservation> {
            self.inner.create_reservation(user_id, tickets).await
        }
        async fn list_reservations(&self, user_id: i64) -> StoreResult<Vec<Reservation>> {
            self.inner.list_reservations(user_id).await
        }
        async fn get_reservation(&self, user_id: i64, id: i64) -> StoreResult<Reservation> {
            self.inner.get_reservation(user_id, id).await
        }
        async fn delete_reservation(&self, user_id: i64, id: i64) -> StoreResult<()> {
            self.inner.delete_reservation(user_id, id).await
        }
    }

    fn big_hall() -> TheatreHall {
        TheatreHall {
            id: 0,
            name: "Gone".to_string(),
            rows: 20,
            seats_in_row: 20,
        }
    }

    #[tokio::test]
    async fn test_performance_removed_after_validation_names_its_ticket() {
        let (inner, p) = setup(10, 10).await;
        let gone = p + 100;
        let store = StaleHalls {
            inner,
            stale: vec![gone],
            hall: big_hall(),
        };

        let err = create_reservation(&store, 1, &[request(1, 1, p), request(1, 1, gone)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::PerformanceNotFound { index: 1, performance } if performance == gone
        ));
        assert!(store.taken_seats(p).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hall_shrunk_after_validation_names_its_ticket() {
        let (inner, p) = setup(5, 5).await;
        let store = StaleHalls {
            inner,
            stale: vec![p],
            hall: big_hall(),
        };

        let err = create_reservation(&store, 1, &[request(1, 1, p), request(2, 9, p)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::SeatOutOfRange {
                index: 1,
                seat: 9,
                seats_in_row: 5
            }
        ));
        assert!(store.list_reservations(1).await.unwrap().is_empty());
    }
}
