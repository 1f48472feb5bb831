//! PostgreSQL store.
//!
//! Ticket uniqueness is enforced by the `tickets_row_seat_performance_key`
//! index; a reservation and its tickets are written in one transaction, so a
//! conflicting ticket rolls the whole reservation back. Concurrent inserts of
//! the same seat block on the index until the first transaction finishes and
//! the later one then fails with a unique violation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tracing::debug;

use super::{
    ensure_sold_seats_fit, CatalogRepository, ReservationRepository, StoreError, StoreResult,
    UserRepository, VenueRepository,
};
use crate::models::{
    Actor, ActorInput, Genre, GenreInput, NewTicket, NewUser, Performance, PerformanceFilter,
    PerformanceInput, PerformanceStats, Play, PlayFilter, PlayInput, PlayRecord, Reservation,
    ReservationRow, TakenSeat, TheatreHall, TheatreHallInput, Ticket, User,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_play_records(&self, plays: Vec<Play>) -> StoreResult<Vec<PlayRecord>> {
        let ids: Vec<i64> = plays.iter().map(|p| p.id).collect();

        let genre_rows: Vec<(i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT pg.play_id, g.id, g.name
            FROM play_genres pg
            JOIN genres g ON g.id = pg.genre_id
            WHERE pg.play_id = ANY($1)
            ORDER BY g.id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let actor_rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT pa.play_id, a.id, a.first_name, a.last_name
            FROM play_actors pa
            JOIN actors a ON a.id = pa.actor_id
            WHERE pa.play_id = ANY($1)
            ORDER BY a.id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut genres: HashMap<i64, Vec<Genre>> = HashMap::new();
        for (play_id, id, name) in genre_rows {
            genres.entry(play_id).or_default().push(Genre { id, name });
        }
        let mut actors: HashMap<i64, Vec<Actor>> = HashMap::new();
        for (play_id, id, first_name, last_name) in actor_rows {
            actors.entry(play_id).or_default().push(Actor {
                id,
                first_name,
                last_name,
            });
        }

        Ok(plays
            .into_iter()
            .map(|play| PlayRecord {
                genres: genres.remove(&play.id).unwrap_or_default(),
                actors: actors.remove(&play.id).unwrap_or_default(),
                play,
            })
            .collect())
    }

    async fn load_one_play(&self, play: Play) -> StoreResult<PlayRecord> {
        let id = play.id;
        self.load_play_records(vec![play])
            .await?
            .pop()
            .ok_or(StoreError::NotFound { entity: "play", id })
    }

    async fn load_reservations(&self, rows: Vec<ReservationRow>) -> StoreResult<Vec<Reservation>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let tickets: Vec<(i64, Ticket)> = sqlx::query_as::<_, TicketWithReservation>(
            r#"
            SELECT id, "row", seat, performance_id, reservation_id
            FROM tickets
            WHERE reservation_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|t| (t.reservation_id, t.into_ticket()))
        .collect();

        let mut by_reservation: HashMap<i64, Vec<Ticket>> = HashMap::new();
        for (reservation_id, ticket) in tickets {
            by_reservation.entry(reservation_id).or_default().push(ticket);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let tickets = by_reservation.remove(&row.id).unwrap_or_default();
                Reservation::from_row(row, tickets)
            })
            .collect())
    }
}

struct TicketWithReservation {
    id: i64,
    row: i32,
    seat: i32,
    performance_id: i64,
    reservation_id: i64,
}

impl<'r> FromRow<'r, PgRow> for TicketWithReservation {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            row: row.try_get("row")?,
            seat: row.try_get("seat")?,
            performance_id: row.try_get("performance_id")?,
            reservation_id: row.try_get("reservation_id")?,
        })
    }
}

impl TicketWithReservation {
    fn into_ticket(self) -> Ticket {
        Ticket {
            id: self.id,
            row: self.row,
            seat: self.seat,
            performance_id: self.performance_id,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

fn duplicate_genre(err: sqlx::Error, name: &str) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Duplicate {
            entity: "genre",
            field: "name",
            value: name.to_string(),
        };
    }
    StoreError::Database(err)
}

fn duplicate_email(err: sqlx::Error, email: &str) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Duplicate {
            entity: "user",
            field: "email",
            value: email.to_string(),
        };
    }
    StoreError::Database(err)
}

fn performance_reference(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_foreign_key_violation() {
            return match db_err.constraint() {
                Some("performances_theatre_hall_id_fkey") => StoreError::InvalidReference {
                    entity: "theatre hall",
                    field: "theatre_hall",
                },
                _ => StoreError::InvalidReference {
                    entity: "play",
                    field: "play",
                },
            };
        }
    }
    StoreError::Database(err)
}

/// Replaces a play's genre and actor links inside `tx`.
async fn link_play(
    tx: &mut Transaction<'_, Postgres>,
    play_id: i64,
    input: &PlayInput,
) -> StoreResult<()> {
    sqlx::query("DELETE FROM play_genres WHERE play_id = $1")
        .bind(play_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM play_actors WHERE play_id = $1")
        .bind(play_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "INSERT INTO play_genres (play_id, genre_id) SELECT $1, UNNEST($2::BIGINT[])",
    )
    .bind(play_id)
    .bind(&input.genres)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            StoreError::InvalidReference {
                entity: "genre",
                field: "genres",
            }
        } else {
            StoreError::Database(e)
        }
    })?;

    sqlx::query(
        "INSERT INTO play_actors (play_id, actor_id) SELECT $1, UNNEST($2::BIGINT[])",
    )
    .bind(play_id)
    .bind(&input.actors)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            StoreError::InvalidReference {
                entity: "actor",
                field: "actors",
            }
        } else {
            StoreError::Database(e)
        }
    })?;

    Ok(())
}

/// Escapes `%`, `_` and `\` so user input matches literally inside `ILIKE`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn expect_deleted(rows_affected: u64, entity: &'static str, id: i64) -> StoreResult<()> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound { entity, id });
    }
    Ok(())
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn list_genres(&self) -> StoreResult<Vec<Genre>> {
        Ok(
            sqlx::query_as::<_, Genre>("SELECT id, name FROM genres ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn get_genre(&self, id: i64) -> StoreResult<Genre> {
        sqlx::query_as::<_, Genre>("SELECT id, name FROM genres WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "genre", id })
    }

    async fn create_genre(&self, input: &GenreInput) -> StoreResult<Genre> {
        sqlx::query_as::<_, Genre>("INSERT INTO genres (name) VALUES ($1) RETURNING id, name")
            .bind(&input.name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| duplicate_genre(e, &input.name))
    }

    async fn update_genre(&self, id: i64, input: &GenreInput) -> StoreResult<Genre> {
        sqlx::query_as::<_, Genre>("UPDATE genres SET name = $2 WHERE id = $1 RETURNING id, name")
            .bind(id)
            .bind(&input.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| duplicate_genre(e, &input.name))?
            .ok_or(StoreError::NotFound { entity: "genre", id })
    }

    async fn delete_genre(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM genres WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_deleted(result.rows_affected(), "genre", id)
    }

    async fn list_actors(&self) -> StoreResult<Vec<Actor>> {
        Ok(sqlx::query_as::<_, Actor>(
            "SELECT id, first_name, last_name FROM actors ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_actor(&self, id: i64) -> StoreResult<Actor> {
        sqlx::query_as::<_, Actor>("SELECT id, first_name, last_name FROM actors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "actor", id })
    }

    async fn create_actor(&self, input: &ActorInput) -> StoreResult<Actor> {
        Ok(sqlx::query_as::<_, Actor>(
            r#"
            INSERT INTO actors (first_name, last_name)
            VALUES ($1, $2)
            RETURNING id, first_name, last_name
            "#,
        )
        .bind(&input.first_name)
        .bind(&input.last_name)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_actor(&self, id: i64, input: &ActorInput) -> StoreResult<Actor> {
        sqlx::query_as::<_, Actor>(
            r#"
            UPDATE actors SET first_name = $2, last_name = $3
            WHERE id = $1
            RETURNING id, first_name, last_name
            "#,
        )
        .bind(id)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "actor", id })
    }

    async fn delete_actor(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM actors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_deleted(result.rows_affected(), "actor", id)
    }

    async fn list_plays(&self, filter: &PlayFilter) -> StoreResult<Vec<PlayRecord>> {
        let plays = sqlx::query_as::<_, Play>(
            r#"
            SELECT p.id, p.title, p.description, p.image
            FROM plays p
            WHERE ($1::BIGINT[] IS NULL OR EXISTS (
                    SELECT 1 FROM play_genres pg
                    WHERE pg.play_id = p.id AND pg.genre_id = ANY($1)))
              AND ($2::BIGINT[] IS NULL OR EXISTS (
                    SELECT 1 FROM play_actors pa
                    WHERE pa.play_id = p.id AND pa.actor_id = ANY($2)))
            ORDER BY p.id
            "#,
        )
        .bind(filter.genres.as_deref())
        .bind(filter.actors.as_deref())
        .fetch_all(&self.pool)
        .await?;

        debug!(count = plays.len(), "Loaded plays");
        self.load_play_records(plays).await
    }

    async fn get_play(&self, id: i64) -> StoreResult<PlayRecord> {
        let play = sqlx::query_as::<_, Play>(
            "SELECT id, title, description, image FROM plays WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "play", id })?;
        self.load_one_play(play).await
    }

    async fn create_play(&self, input: &PlayInput) -> StoreResult<PlayRecord> {
        let mut tx = self.pool.begin().await?;
        let play = sqlx::query_as::<_, Play>(
            r#"
            INSERT INTO plays (title, description)
            VALUES ($1, $2)
            RETURNING id, title, description, image
            "#,
        )
        .bind(&input.title)
        .bind(&input.description)
        .fetch_one(&mut *tx)
        .await?;
        link_play(&mut tx, play.id, input).await?;
        tx.commit().await?;

        self.load_one_play(play).await
    }

    async fn update_play(&self, id: i64, input: &PlayInput) -> StoreResult<PlayRecord> {
        let mut tx = self.pool.begin().await?;
        let play = sqlx::query_as::<_, Play>(
            r#"
            UPDATE plays SET title = $2, description = $3
            WHERE id = $1
            RETURNING id, title, description, image
            "#,
        )
        .bind(id)
        .bind(&input.title)
        .bind(&input.description)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound { entity: "play", id })?;
        link_play(&mut tx, id, input).await?;
        tx.commit().await?;

        self.load_one_play(play).await
    }

    async fn delete_play(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM plays WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_deleted(result.rows_affected(), "play", id)
    }

    async fn set_play_image(&self, id: i64, image: &str) -> StoreResult<Play> {
        sqlx::query_as::<_, Play>(
            r#"
            UPDATE plays SET image = $2
            WHERE id = $1
            RETURNING id, title, description, image
            "#,
        )
        .bind(id)
        .bind(image)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "play", id })
    }
}

#[async_trait]
impl VenueRepository for PgStore {
    async fn list_halls(&self) -> StoreResult<Vec<TheatreHall>> {
        Ok(sqlx::query_as::<_, TheatreHall>(
            "SELECT id, name, rows, seats_in_row FROM theatre_halls ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_hall(&self, id: i64) -> StoreResult<TheatreHall> {
        sqlx::query_as::<_, TheatreHall>(
            "SELECT id, name, rows, seats_in_row FROM theatre_halls WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "theatre hall",
            id,
        })
    }

    async fn create_hall(&self, input: &TheatreHallInput) -> StoreResult<TheatreHall> {
        Ok(sqlx::query_as::<_, TheatreHall>(
            r#"
            INSERT INTO theatre_halls (name, rows, seats_in_row)
            VALUES ($1, $2, $3)
            RETURNING id, name, rows, seats_in_row
            "#,
        )
        .bind(&input.name)
        .bind(input.rows)
        .bind(input.seats_in_row)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_hall(&self, id: i64, input: &TheatreHallInput) -> StoreResult<TheatreHall> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM theatre_halls WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "theatre hall",
                id,
            })?;

        let max_sold: (i32, i32) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(t."row"), 0), COALESCE(MAX(t.seat), 0)
            FROM tickets t
            JOIN performances pf ON pf.id = t.performance_id
            WHERE pf.theatre_hall_id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        ensure_sold_seats_fit(max_sold, input.rows, input.seats_in_row, None)?;

        let hall = sqlx::query_as::<_, TheatreHall>(
            r#"
            UPDATE theatre_halls SET name = $2, rows = $3, seats_in_row = $4
            WHERE id = $1
            RETURNING id, name, rows, seats_in_row
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.rows)
        .bind(input.seats_in_row)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(hall)
    }

    async fn delete_hall(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM theatre_halls WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_deleted(result.rows_affected(), "theatre hall", id)
    }

    async fn list_performances(
        &self,
        filter: &PerformanceFilter,
    ) -> StoreResult<Vec<PerformanceStats>> {
        let title = filter.play.as_deref().map(escape_like);
        Ok(sqlx::query_as::<_, PerformanceStats>(
            r#"
            SELECT pf.id, pf.play_id, pf.theatre_hall_id, pf.show_time,
                   p.title AS play_title, h.name AS hall_name,
                   h.rows, h.seats_in_row,
                   COUNT(t.id) AS sold
            FROM performances pf
            JOIN plays p ON p.id = pf.play_id
            JOIN theatre_halls h ON h.id = pf.theatre_hall_id
            LEFT JOIN tickets t ON t.performance_id = pf.id
            WHERE ($1::TEXT IS NULL OR p.title ILIKE '%' || $1 || '%')
              AND ($2::BIGINT[] IS NULL OR pf.id = ANY($2))
            GROUP BY pf.id, p.id, h.id
            ORDER BY pf.id
            "#,
        )
        .bind(title)
        .bind(filter.ids.as_deref())
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_performance(&self, id: i64) -> StoreResult<Performance> {
        sqlx::query_as::<_, Performance>(
            "SELECT id, play_id, theatre_hall_id, show_time FROM performances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "performance",
            id,
        })
    }

    async fn find_performance_hall(&self, performance_id: i64) -> StoreResult<Option<TheatreHall>> {
        Ok(sqlx::query_as::<_, TheatreHall>(
            r#"
            SELECT h.id, h.name, h.rows, h.seats_in_row
            FROM performances pf
            JOIN theatre_halls h ON h.id = pf.theatre_hall_id
            WHERE pf.id = $1
            "#,
        )
        .bind(performance_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn taken_seats(&self, performance_id: i64) -> StoreResult<Vec<TakenSeat>> {
        Ok(sqlx::query_as::<_, TakenSeat>(
            r#"
            SELECT "row", seat FROM tickets
            WHERE performance_id = $1
            ORDER BY "row", seat
            "#,
        )
        .bind(performance_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn create_performance(&self, input: &PerformanceInput) -> StoreResult<Performance> {
        sqlx::query_as::<_, Performance>(
            r#"
            INSERT INTO performances (play_id, theatre_hall_id, show_time)
            VALUES ($1, $2, $3)
            RETURNING id, play_id, theatre_hall_id, show_time
            "#,
        )
        .bind(input.play)
        .bind(input.theatre_hall)
        .bind(input.show_time)
        .fetch_one(&self.pool)
        .await
        .map_err(performance_reference)
    }

    async fn update_performance(
        &self,
        id: i64,
        input: &PerformanceInput,
    ) -> StoreResult<Performance> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM performances WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "performance",
                id,
            })?;

        let (rows, seats_in_row): (i32, i32) = sqlx::query_as(
            "SELECT rows, seats_in_row FROM theatre_halls WHERE id = $1 FOR SHARE",
        )
        .bind(input.theatre_hall)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::InvalidReference {
            entity: "theatre hall",
            field: "theatre_hall",
        })?;

        let max_sold: (i32, i32) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX("row"), 0), COALESCE(MAX(seat), 0)
            FROM tickets
            WHERE performance_id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        ensure_sold_seats_fit(max_sold, rows, seats_in_row, Some("theatre_hall"))?;

        let performance = sqlx::query_as::<_, Performance>(
            r#"
            UPDATE performances SET play_id = $2, theatre_hall_id = $3, show_time = $4
            WHERE id = $1
            RETURNING id, play_id, theatre_hall_id, show_time
            "#,
        )
        .bind(id)
        .bind(input.play)
        .bind(input.theatre_hall)
        .bind(input.show_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(performance_reference)?;

        tx.commit().await?;
        Ok(performance)
    }

    async fn delete_performance(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM performances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_deleted(result.rows_affected(), "performance", id)
    }
}

#[async_trait]
impl ReservationRepository for PgStore {
    async fn create_reservation(
        &self,
        user_id: i64,
        tickets: &[NewTicket],
    ) -> StoreResult<Reservation> {
        // Dropping `tx` on any early return rolls everything back.
        let mut tx = self.pool.begin().await?;

        // Share-locks the performances and their halls so a concurrent resize
        // or move waits for this reservation to finish.
        let performance_ids: Vec<i64> = tickets.iter().map(|t| t.performance_id).collect();
        let halls: HashMap<i64, (i32, i32)> = sqlx::query_as::<_, (i64, i32, i32)>(
            r#"
            SELECT pf.id, h.rows, h.seats_in_row
            FROM performances pf
            JOIN theatre_halls h ON h.id = pf.theatre_hall_id
            WHERE pf.id = ANY($1)
            FOR SHARE
            "#,
        )
        .bind(&performance_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(id, rows, seats_in_row)| (id, (rows, seats_in_row)))
        .collect();

        for ticket in tickets {
            let Some(&(rows, seats_in_row)) = halls.get(&ticket.performance_id) else {
                return Err(StoreError::NotFound {
                    entity: "performance",
                    id: ticket.performance_id,
                });
            };
            if !(1..=rows).contains(&ticket.row) || !(1..=seats_in_row).contains(&ticket.seat) {
                return Err(StoreError::SeatOutOfBounds {
                    row: ticket.row,
                    seat: ticket.seat,
                    performance_id: ticket.performance_id,
                    rows,
                    seats_in_row,
                });
            }
        }

        let row = sqlx::query_as::<_, ReservationRow>(
            r#"
            INSERT INTO reservations (user_id)
            VALUES ($1)
            RETURNING id, created_at, user_id
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        // Every transaction takes seat locks in the same order, so crossed
        // requests for the same seats cannot deadlock.
        let mut order: Vec<usize> = (0..tickets.len()).collect();
        order.sort_by_key(|&i| (tickets[i].performance_id, tickets[i].row, tickets[i].seat));

        let mut inserted: Vec<Option<Ticket>> = vec![None; tickets.len()];
        for index in order {
            let ticket = &tickets[index];
            let saved = sqlx::query_as::<_, Ticket>(
                r#"
                INSERT INTO tickets ("row", seat, performance_id, reservation_id)
                VALUES ($1, $2, $3, $4)
                RETURNING id, "row", seat, performance_id
                "#,
            )
            .bind(ticket.row)
            .bind(ticket.seat)
            .bind(ticket.performance_id)
            .bind(row.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::SeatTaken {
                        row: ticket.row,
                        seat: ticket.seat,
                        performance_id: ticket.performance_id,
                    }
                } else if is_foreign_key_violation(&e) {
                    StoreError::NotFound {
                        entity: "performance",
                        id: ticket.performance_id,
                    }
                } else {
                    StoreError::Database(e)
                }
            })?;
            inserted[index] = Some(saved);
        }

        tx.commit().await?;
        Ok(Reservation::from_row(row, inserted.into_iter().flatten().collect()))
    }

    async fn list_reservations(&self, user_id: i64) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT id, created_at, user_id FROM reservations
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.load_reservations(rows).await
    }

    async fn get_reservation(&self, user_id: i64, id: i64) -> StoreResult<Reservation> {
        let row = sqlx::query_as::<_, ReservationRow>(
            "SELECT id, created_at, user_id FROM reservations WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "reservation",
            id,
        })?;
        self.load_reservations(vec![row])
            .await?
            .pop()
            .ok_or(StoreError::NotFound {
                entity: "reservation",
                id,
            })
    }

    async fn delete_reservation(&self, user_id: i64, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        expect_deleted(result.rows_affected(), "reservation", id)
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, is_staff, created_at";

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, is_staff) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_staff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| duplicate_email(e, &user.email))
    }

    async fn get_user(&self, id: i64) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "user", id })
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn update_user(&self, id: i64, email: &str, password_hash: &str) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET email = $2, password_hash = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| duplicate_email(e, email))?
        .ok_or(StoreError::NotFound { entity: "user", id })
    }

    async fn store_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1 AND expires_at <= NOW()")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO auth_tokens (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token_hash)
            .bind(user_id)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_user_by_token(&self, token_hash: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.password_hash, u.is_staff, u.created_at
            FROM auth_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token_hash = $1 AND t.expires_at > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn revoke_token(&self, token_hash: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM auth_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
