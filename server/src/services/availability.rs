use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AvailabilityError {
    #[error("performance {performance_id} has {sold} tickets sold for {capacity} seats")]
    Overbooked {
        performance_id: i64,
        capacity: i64,
        sold: i64,
    },
}

/// Seats still free for a performance: hall capacity minus tickets sold.
///
/// Computed on every read. A negative result can only come from a broken
/// ticket uniqueness constraint and is reported as an error.
pub fn tickets_available(
    performance_id: i64,
    capacity: i64,
    sold: i64,
) -> Result<i64, AvailabilityError> {
    let available = capacity - sold;
    if available < 0 {
        error!(
            performance_id,
            capacity, sold, "More tickets sold than seats in the hall"
        );
        return Err(AvailabilityError::Overbooked {
            performance_id,
            capacity,
            sold,
        });
    }
    Ok(available)
}
