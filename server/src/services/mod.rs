pub mod allocator;
pub mod availability;
pub mod seat;

pub use allocator::{create_reservation, AllocationError};
pub use availability::{tickets_available, AvailabilityError};
pub use seat::{validate_seat, SeatError};
