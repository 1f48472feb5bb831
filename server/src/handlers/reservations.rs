use std::collections::{BTreeSet, HashMap};

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::auth::AuthUser;
use crate::models::{
    PerformanceFilter, PerformanceListItem, Reservation, ReservationInput, ReservationListItem,
    TicketListItem,
};
use crate::services;
use crate::state::AppState;
use crate::utils::response::{created, empty_success, success};
use crate::utils::AppError;

pub async fn create_reservation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(input): Json<ReservationInput>,
) -> Result<Response, AppError> {
    let reservation =
        services::create_reservation(state.store.as_ref(), user.id, &input.tickets).await?;
    Ok(created(reservation, "Reservation created").into_response())
}

pub async fn list_reservations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Response, AppError> {
    let reservations = state.store.list_reservations(user.id).await?;
    let items = expand(&state, reservations).await?;
    Ok(success(items, "Reservations retrieved").into_response())
}

pub async fn get_reservation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let reservation = state.store.get_reservation(user.id, id).await?;
    let item = expand(&state, vec![reservation])
        .await?
        .pop()
        .ok_or_else(|| AppError::InternalServerError("reservation vanished".to_string()))?;
    Ok(success(item, "Reservation retrieved").into_response())
}

/// Frees every seat the reservation held.
pub async fn delete_reservation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    state.store.delete_reservation(user.id, id).await?;
    info!(reservation_id = id, user_id = user.id, "Reservation deleted");
    Ok(empty_success("Reservation deleted").into_response())
}

/// Embeds the performance list view into every ticket.
async fn expand(
    state: &AppState,
    reservations: Vec<Reservation>,
) -> Result<Vec<ReservationListItem>, AppError> {
    let ids: BTreeSet<i64> = reservations
        .iter()
        .flat_map(Reservation::performance_ids)
        .collect();

    let mut performances = HashMap::new();
    if !ids.is_empty() {
        let filter = PerformanceFilter::by_ids(ids.into_iter().collect());
        for stats in state.store.list_performances(&filter).await? {
            let item = PerformanceListItem::try_from(stats)?;
            performances.insert(item.id, item);
        }
    }

    reservations
        .into_iter()
        .map(|reservation| {
            let tickets = reservation
                .tickets
                .into_iter()
                .map(|ticket| {
                    let performance = performances
                        .get(&ticket.performance_id)
                        .cloned()
                        .ok_or_else(|| {
                            AppError::InternalServerError(format!(
                                "performance {} missing for ticket {}",
                                ticket.performance_id, ticket.id
                            ))
                        })?;
                    Ok(TicketListItem {
                        id: ticket.id,
                        row: ticket.row,
                        seat: ticket.seat,
                        performance,
                    })
                })
                .collect::<Result<Vec<_>, AppError>>()?;
            Ok(ReservationListItem {
                id: reservation.id,
                created_at: reservation.created_at,
                tickets,
            })
        })
        .collect()
}
