//! In-memory store.
//!
//! All tables live behind one mutex, so every operation (including the
//! check-and-insert of a reservation's tickets) is serialized.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

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
struct TicketRow {
    ticket: Ticket,
    reservation_id: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    sequences: HashMap<&'static str, i64>,
    genres: BTreeMap<i64, Genre>,
    actors: BTreeMap<i64, Actor>,
    plays: BTreeMap<i64, Play>,
    play_genres: BTreeMap<i64, BTreeSet<i64>>,
    play_actors: BTreeMap<i64, BTreeSet<i64>>,
    halls: BTreeMap<i64, TheatreHall>,
    performances: BTreeMap<i64, Performance>,
    reservations: BTreeMap<i64, ReservationRow>,
    tickets: BTreeMap<i64, TicketRow>,
    users: BTreeMap<i64, User>,
    tokens: HashMap<String, (i64, DateTime<Utc>)>,
}

impl MemoryState {
    /// Highest sold `(row, seat)` among tickets of the matching performances.
    fn max_sold(&self, performance: impl Fn(&Performance) -> bool) -> (i32, i32) {
        self.tickets
            .values()
            .filter(|t| {
                self.performances
                    .get(&t.ticket.performance_id)
                    .is_some_and(&performance)
            })
            .fold((0, 0), |(row, seat), t| {
                (row.max(t.ticket.row), seat.max(t.ticket.seat))
            })
    }

    fn next_id(&mut self, table: &'static str) -> i64 {
        let id = self.sequences.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn play_record(&self, play: &Play) -> PlayRecord {
        let genres = self
            .play_genres
            .get(&play.id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.genres.get(id).cloned())
            .collect();
        let actors = self
            .play_actors
            .get(&play.id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.actors.get(id).cloned())
            .collect();
        PlayRecord {
            play: play.clone(),
            genres,
            actors,
        }
    }

    fn check_play_refs(&self, input: &PlayInput) -> StoreResult<()> {
        if input.genres.iter().any(|id| !self.genres.contains_key(id)) {
            return Err(StoreError::InvalidReference {
                entity: "genre",
                field: "genres",
            });
        }
        if input.actors.iter().any(|id| !self.actors.contains_key(id)) {
            return Err(StoreError::InvalidReference {
                entity: "actor",
                field: "actors",
            });
        }
        Ok(())
    }

    fn check_performance_refs(&self, input: &PerformanceInput) -> StoreResult<()> {
        if !self.plays.contains_key(&input.play) {
            return Err(StoreError::InvalidReference {
                entity: "play",
                field: "play",
            });
        }
        if !self.halls.contains_key(&input.theatre_hall) {
            return Err(StoreError::InvalidReference {
                entity: "theatre hall",
                field: "theatre_hall",
            });
        }
        Ok(())
    }

    fn genre_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.genres
            .values()
            .any(|g| g.name == name && Some(g.id) != except)
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn remove_performance(&mut self, id: i64) {
        self.performances.remove(&id);
        self.tickets.retain(|_, t| t.ticket.performance_id != id);
    }

    fn reservation(&self, row: &ReservationRow) -> Reservation {
        let tickets = self
            .tickets
            .values()
            .filter(|t| t.reservation_id == row.id)
            .map(|t| t.ticket.clone())
            .collect();
        Reservation::from_row(row.clone(), tickets)
    }

    fn owned_reservation(&self, user_id: i64, id: i64) -> StoreResult<&ReservationRow> {
        self.reservations
            .get(&id)
            .filter(|r| r.user_id == user_id)
            .ok_or(StoreError::NotFound {
                entity: "reservation",
                id,
            })
    }
}

/// Store backed by process memory. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn not_found(entity: &'static str, id: i64) -> StoreError {
    StoreError::NotFound { entity, id }
}

#[async_trait]
impl CatalogRepository for InMemoryStore {
    async fn list_genres(&self) -> StoreResult<Vec<Genre>> {
        Ok(self.state()?.genres.values().cloned().collect())
    }

    async fn get_genre(&self, id: i64) -> StoreResult<Genre> {
        self.state()?
            .genres
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("genre", id))
    }

    async fn create_genre(&self, input: &GenreInput) -> StoreResult<Genre> {
        let mut state = self.state()?;
        if state.genre_name_taken(&input.name, None) {
            return Err(StoreError::Duplicate {
                entity: "genre",
                field: "name",
                value: input.name.clone(),
            });
        }
        let genre = Genre {
            id: state.next_id("genres"),
            name: input.name.clone(),
        };
        state.genres.insert(genre.id, genre.clone());
        Ok(genre)
    }

    async fn update_genre(&self, id: i64, input: &GenreInput) -> StoreResult<Genre> {
        let mut state = self.state()?;
        if !state.genres.contains_key(&id) {
            return Err(not_found("genre", id));
        }
        if state.genre_name_taken(&input.name, Some(id)) {
            return Err(StoreError::Duplicate {
                entity: "genre",
                field: "name",
                value: input.name.clone(),
            });
        }
        let genre = Genre {
            id,
            name: input.name.clone(),
        };
        state.genres.insert(id, genre.clone());
        Ok(genre)
    }

    async fn delete_genre(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        state.genres.remove(&id).ok_or_else(|| not_found("genre", id))?;
        for genres in state.play_genres.values_mut() {
            genres.remove(&id);
        }
        Ok(())
    }

    async fn list_actors(&self) -> StoreResult<Vec<Actor>> {
        Ok(self.state()?.actors.values().cloned().collect())
    }

    async fn get_actor(&self, id: i64) -> StoreResult<Actor> {
        self.state()?
            .actors
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("actor", id))
    }

    async fn create_actor(&self, input: &ActorInput) -> StoreResult<Actor> {
        let mut state = self.state()?;
        let actor = Actor {
            id: state.next_id("actors"),
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
        };
        state.actors.insert(actor.id, actor.clone());
        Ok(actor)
    }

    async fn update_actor(&self, id: i64, input: &ActorInput) -> StoreResult<Actor> {
        let mut state = self.state()?;
        let actor = state.actors.get_mut(&id).ok_or_else(|| not_found("actor", id))?;
        actor.first_name = input.first_name.clone();
        actor.last_name = input.last_name.clone();
        Ok(actor.clone())
    }

    async fn delete_actor(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        state.actors.remove(&id).ok_or_else(|| not_found("actor", id))?;
        for actors in state.play_actors.values_mut() {
            actors.remove(&id);
        }
        Ok(())
    }

    async fn list_plays(&self, filter: &PlayFilter) -> StoreResult<Vec<PlayRecord>> {
        let state = self.state()?;
        Ok(state
            .plays
            .values()
            .map(|play| state.play_record(play))
            .filter(|record| filter.matches(record))
            .collect())
    }

    async fn get_play(&self, id: i64) -> StoreResult<PlayRecord> {
        let state = self.state()?;
        let play = state.plays.get(&id).ok_or_else(|| not_found("play", id))?;
        Ok(state.play_record(play))
    }

    async fn create_play(&self, input: &PlayInput) -> StoreResult<PlayRecord> {
        let mut state = self.state()?;
        state.check_play_refs(input)?;
        let play = Play {
            id: state.next_id("plays"),
            title: input.title.clone(),
            description: input.description.clone(),
            image: None,
        };
        state.plays.insert(play.id, play.clone());
        state
            .play_genres
            .insert(play.id, input.genres.iter().copied().collect());
        state
            .play_actors
            .insert(play.id, input.actors.iter().copied().collect());
        Ok(state.play_record(&play))
    }

    async fn update_play(&self, id: i64, input: &PlayInput) -> StoreResult<PlayRecord> {
        let mut state = self.state()?;
        if !state.plays.contains_key(&id) {
            return Err(not_found("play", id));
        }
        state.check_play_refs(input)?;
        let play = state.plays.get_mut(&id).ok_or_else(|| not_found("play", id))?;
        play.title = input.title.clone();
        play.description = input.description.clone();
        let play = play.clone();
        state
            .play_genres
            .insert(id, input.genres.iter().copied().collect());
        state
            .play_actors
            .insert(id, input.actors.iter().copied().collect());
        Ok(state.play_record(&play))
    }

    async fn delete_play(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        state.plays.remove(&id).ok_or_else(|| not_found("play", id))?;
        state.play_genres.remove(&id);
        state.play_actors.remove(&id);
        let performances: Vec<i64> = state
            .performances
            .values()
            .filter(|p| p.play_id == id)
            .map(|p| p.id)
            .collect();
        for performance_id in performances {
            state.remove_performance(performance_id);
        }
        Ok(())
    }

    async fn set_play_image(&self, id: i64, image: &str) -> StoreResult<Play> {
        let mut state = self.state()?;
        let play = state.plays.get_mut(&id).ok_or_else(|| not_found("play", id))?;
        play.image = Some(image.to_string());
        Ok(play.clone())
    }
}

#[async_trait]
impl VenueRepository for InMemoryStore {
    async fn list_halls(&self) -> StoreResult<Vec<TheatreHall>> {
        Ok(self.state()?.halls.values().cloned().collect())
    }

    async fn get_hall(&self, id: i64) -> StoreResult<TheatreHall> {
        self.state()?
            .halls
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("theatre hall", id))
    }

    async fn create_hall(&self, input: &TheatreHallInput) -> StoreResult<TheatreHall> {
        let mut state = self.state()?;
        let hall = TheatreHall {
            id: state.next_id("theatre_halls"),
            name: input.name.clone(),
            rows: input.rows,
            seats_in_row: input.seats_in_row,
        };
        state.halls.insert(hall.id, hall.clone());
        Ok(hall)
    }

    async fn update_hall(&self, id: i64, input: &TheatreHallInput) -> StoreResult<TheatreHall> {
        let mut state = self.state()?;
        if !state.halls.contains_key(&id) {
            return Err(not_found("theatre hall", id));
        }
        let max_sold = state.max_sold(|p| p.theatre_hall_id == id);
        ensure_sold_seats_fit(max_sold, input.rows, input.seats_in_row, None)?;

        let hall = state
            .halls
            .get_mut(&id)
            .ok_or_else(|| not_found("theatre hall", id))?;
        hall.name = input.name.clone();
        hall.rows = input.rows;
        hall.seats_in_row = input.seats_in_row;
        Ok(hall.clone())
    }

    async fn delete_hall(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        state
            .halls
            .remove(&id)
            .ok_or_else(|| not_found("theatre hall", id))?;
        let performances: Vec<i64> = state
            .performances
            .values()
            .filter(|p| p.theatre_hall_id == id)
            .map(|p| p.id)
            .collect();
        for performance_id in performances {
            state.remove_performance(performance_id);
        }
        Ok(())
    }

    async fn list_performances(
        &self,
        filter: &PerformanceFilter,
    ) -> StoreResult<Vec<PerformanceStats>> {
        let state = self.state()?;
        let mut sold: HashMap<i64, i64> = HashMap::new();
        for row in state.tickets.values() {
            *sold.entry(row.ticket.performance_id).or_insert(0) += 1;
        }

        let mut stats = Vec::new();
        for performance in state.performances.values() {
            let (Some(play), Some(hall)) = (
                state.plays.get(&performance.play_id),
                state.halls.get(&performance.theatre_hall_id),
            ) else {
                continue;
            };
            if !filter.matches(performance.id, &play.title) {
                continue;
            }
            stats.push(PerformanceStats {
                id: performance.id,
                play_id: play.id,
                theatre_hall_id: hall.id,
                show_time: performance.show_time,
                play_title: play.title.clone(),
                hall_name: hall.name.clone(),
                rows: hall.rows,
                seats_in_row: hall.seats_in_row,
                sold: sold.get(&performance.id).copied().unwrap_or(0),
            });
        }
        Ok(stats)
    }

    async fn get_performance(&self, id: i64) -> StoreResult<Performance> {
        self.state()?
            .performances
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("performance", id))
    }

    async fn find_performance_hall(&self, performance_id: i64) -> StoreResult<Option<TheatreHall>> {
        let state = self.state()?;
        Ok(state
            .performances
            .get(&performance_id)
            .and_then(|p| state.halls.get(&p.theatre_hall_id))
            .cloned())
    }

    async fn taken_seats(&self, performance_id: i64) -> StoreResult<Vec<TakenSeat>> {
        let state = self.state()?;
        let mut seats: Vec<TakenSeat> = state
            .tickets
            .values()
            .filter(|t| t.ticket.performance_id == performance_id)
            .map(|t| TakenSeat {
                row: t.ticket.row,
                seat: t.ticket.seat,
            })
            .collect();
        seats.sort_by_key(|s| (s.row, s.seat));
        Ok(seats)
    }

    async fn create_performance(&self, input: &PerformanceInput) -> StoreResult<Performance> {
        let mut state = self.state()?;
        state.check_performance_refs(input)?;
        let performance = Performance {
            id: state.next_id("performances"),
            play_id: input.play,
            theatre_hall_id: input.theatre_hall,
            show_time: input.show_time,
        };
        state.performances.insert(performance.id, performance.clone());
        Ok(performance)
    }

    async fn update_performance(
        &self,
        id: i64,
        input: &PerformanceInput,
    ) -> StoreResult<Performance> {
        let mut state = self.state()?;
        if !state.performances.contains_key(&id) {
            return Err(not_found("performance", id));
        }
        state.check_performance_refs(input)?;
        if let Some(hall) = state.halls.get(&input.theatre_hall) {
            let max_sold = state.max_sold(|p| p.id == id);
            ensure_sold_seats_fit(max_sold, hall.rows, hall.seats_in_row, Some("theatre_hall"))?;
        }
        let performance = Performance {
            id,
            play_id: input.play,
            theatre_hall_id: input.theatre_hall,
            show_time: input.show_time,
        };
        state.performances.insert(id, performance.clone());
        Ok(performance)
    }

    async fn delete_performance(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        if !state.performances.contains_key(&id) {
            return Err(not_found("performance", id));
        }
        state.remove_performance(id);
        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for InMemoryStore {
    async fn create_reservation(
        &self,
        user_id: i64,
        tickets: &[NewTicket],
    ) -> StoreResult<Reservation> {
        let mut state = self.state()?;

        // Validate the whole batch before touching any table.
        let mut taken: BTreeSet<(i32, i32, i64)> = state
            .tickets
            .values()
            .map(|t| (t.ticket.row, t.ticket.seat, t.ticket.performance_id))
            .collect();
        for ticket in tickets {
            let hall = state
                .performances
                .get(&ticket.performance_id)
                .and_then(|p| state.halls.get(&p.theatre_hall_id))
                .ok_or_else(|| not_found("performance", ticket.performance_id))?;
            if !(1..=hall.rows).contains(&ticket.row)
                || !(1..=hall.seats_in_row).contains(&ticket.seat)
            {
                return Err(StoreError::SeatOutOfBounds {
                    row: ticket.row,
                    seat: ticket.seat,
                    performance_id: ticket.performance_id,
                    rows: hall.rows,
                    seats_in_row: hall.seats_in_row,
                });
            }
            if !taken.insert((ticket.row, ticket.seat, ticket.performance_id)) {
                return Err(StoreError::SeatTaken {
                    row: ticket.row,
                    seat: ticket.seat,
                    performance_id: ticket.performance_id,
                });
            }
        }

        let row = ReservationRow {
            id: state.next_id("reservations"),
            created_at: Utc::now(),
            user_id,
        };
        state.reservations.insert(row.id, row.clone());
        for ticket in tickets {
            let id = state.next_id("tickets");
            state.tickets.insert(
                id,
                TicketRow {
                    ticket: Ticket {
                        id,
                        row: ticket.row,
                        seat: ticket.seat,
                        performance_id: ticket.performance_id,
                    },
                    reservation_id: row.id,
                },
            );
        }
        Ok(state.reservation(&row))
    }

    async fn list_reservations(&self, user_id: i64) -> StoreResult<Vec<Reservation>> {
        let state = self.state()?;
        Ok(state
            .reservations
            .values()
            .rev()
            .filter(|r| r.user_id == user_id)
            .map(|r| state.reservation(r))
            .collect())
    }

    async fn get_reservation(&self, user_id: i64, id: i64) -> StoreResult<Reservation> {
        let state = self.state()?;
        let row = state.owned_reservation(user_id, id)?;
        Ok(state.reservation(row))
    }

    async fn delete_reservation(&self, user_id: i64, id: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        state.owned_reservation(user_id, id)?;
        state.reservations.remove(&id);
        state.tickets.retain(|_, t| t.reservation_id != id);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create_user(&self, user: &NewUser) -> StoreResult<User> {
        let mut state = self.state()?;
        if state.email_taken(&user.email, None) {
            return Err(StoreError::Duplicate {
                entity: "user",
                field: "email",
                value: user.email.clone(),
            });
        }
        let user = User {
            id: state.next_id("users"),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            is_staff: user.is_staff,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i64) -> StoreResult<User> {
        self.state()?
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("user", id))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_user(&self, id: i64, email: &str, password_hash: &str) -> StoreResult<User> {
        let mut state = self.state()?;
        if state.email_taken(email, Some(id)) {
            return Err(StoreError::Duplicate {
                entity: "user",
                field: "email",
                value: email.to_string(),
            });
        }
        let user = state.users.get_mut(&id).ok_or_else(|| not_found("user", id))?;
        user.email = email.to_string();
        user.password_hash = password_hash.to_string();
        Ok(user.clone())
    }

    async fn store_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state()?;
        if !state.users.contains_key(&user_id) {
            return Err(not_found("user", user_id));
        }
        let now = Utc::now();
        state
            .tokens
            .retain(|_, (owner, expiry)| *owner != user_id || *expiry > now);
        state
            .tokens
            .insert(token_hash.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn find_user_by_token(&self, token_hash: &str) -> StoreResult<Option<User>> {
        let state = self.state()?;
        Ok(state
            .tokens
            .get(token_hash)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .and_then(|(id, _)| state.users.get(id))
            .cloned())
    }

    async fn revoke_token(&self, token_hash: &str) -> StoreResult<()> {
        self.state()?.tokens.remove(token_hash);
        Ok(())
    }
}
