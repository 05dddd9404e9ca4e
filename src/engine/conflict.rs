use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    let trimmed = name.trim();
    if trimmed.len() < MIN_NAME_LEN {
        return Err(EngineError::Validation("name too short"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::Validation("name too long"));
    }
    if !trimmed.chars().any(|c| c.is_alphabetic()) {
        return Err(EngineError::Validation("name must contain letters"));
    }
    Ok(())
}

pub(crate) fn validate_category(category: &str) -> Result<(), EngineError> {
    if category.is_empty() {
        return Err(EngineError::Validation("category must not be empty"));
    }
    if category.len() > MAX_CATEGORY_LEN {
        return Err(EngineError::Validation("category too long"));
    }
    Ok(())
}

pub(crate) fn validate_address(address: &str) -> Result<(), EngineError> {
    // An empty address is allowed; the front-end collects it lazily.
    if address.len() > MAX_ADDRESS_LEN {
        return Err(EngineError::Validation("address too long"));
    }
    Ok(())
}

pub(crate) fn validate_phone(phone: Option<&str>) -> Result<(), EngineError> {
    let Some(phone) = phone else { return Ok(()) };
    if phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::Validation("phone number too long"));
    }
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < 9 {
        return Err(EngineError::Validation("phone number too short"));
    }
    if !phone
        .chars()
        .all(|c| c.is_ascii_digit() || c == '+' || c == '-' || c == ' ')
    {
        return Err(EngineError::Validation("phone number has invalid characters"));
    }
    Ok(())
}

/// The availability predicate, evaluated under the resource lock.
///
/// A `(resource, span)` pair is free unless the span overlaps the
/// resource's inactivity window or any confirmed booking. Half-open:
/// touching endpoints do not conflict. A read-time "free" answer is
/// advisory only — commits re-run this with the write guard held.
pub(crate) fn check_is_free(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    if let Some(window) = rs.inactive
        && window.overlaps(span)
    {
        return Err(EngineError::Conflict(rs.id));
    }
    for booking in rs.overlapping(span) {
        if booking.blocks() {
            return Err(EngineError::Conflict(booking.id));
        }
    }
    Ok(())
}

/// Same check, ignoring one booking — used when rescheduling it.
pub(crate) fn check_is_free_excluding(
    rs: &ResourceState,
    span: &Span,
    exclude: Ulid,
) -> Result<(), EngineError> {
    if let Some(window) = rs.inactive
        && window.overlaps(span)
    {
        return Err(EngineError::Conflict(rs.id));
    }
    for booking in rs.overlapping(span) {
        if booking.blocks() && booking.id != exclude {
            return Err(EngineError::Conflict(booking.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn resource() -> ResourceState {
        ResourceState::new(Ulid::new(), "Ana".into(), "any".into())
    }

    fn booking(rs: &ResourceState, start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            resource_id: rs.id,
            requester_id: 7,
            subject_name: "Budi".into(),
            subject_category: "any".into(),
            subject_address: String::new(),
            span: Span::new(start, end),
            status,
            created_at: 0,
            reminder_job_id: None,
        }
    }

    #[test]
    fn free_when_empty() {
        let rs = resource();
        assert!(check_is_free(&rs, &Span::new(10 * H, 11 * H)).is_ok());
    }

    #[test]
    fn confirmed_booking_conflicts() {
        let mut rs = resource();
        let b = booking(&rs, 10 * H, 10 * H + 40 * M, BookingStatus::Confirmed);
        rs.insert_booking(b);

        // 10:20 for 40 minutes lands inside 10:00–10:40
        let mid = Span::from_minutes(10 * H + 20 * M, 40);
        assert!(matches!(
            check_is_free(&rs, &mid),
            Err(EngineError::Conflict(_))
        ));

        // back-to-back at 10:40 is fine (half-open)
        let after = Span::from_minutes(10 * H + 40 * M, 40);
        assert!(check_is_free(&rs, &after).is_ok());
    }

    #[test]
    fn cancelled_booking_does_not_conflict() {
        let mut rs = resource();
        rs.insert_booking(booking(&rs, 10 * H, 11 * H, BookingStatus::Cancelled));
        rs.insert_booking(booking(&rs, 11 * H, 12 * H, BookingStatus::Completed));
        assert!(check_is_free(&rs, &Span::new(10 * H, 12 * H)).is_ok());
    }

    #[test]
    fn inactivity_window_conflicts() {
        let mut rs = resource();
        rs.inactive = Some(Span::new(9 * H, 12 * H));
        assert!(check_is_free(&rs, &Span::new(11 * H, 13 * H)).is_err());
        // adjacent to the window end is free
        assert!(check_is_free(&rs, &Span::new(12 * H, 13 * H)).is_ok());
    }

    #[test]
    fn excluding_own_booking() {
        let mut rs = resource();
        let b = booking(&rs, 10 * H, 11 * H, BookingStatus::Confirmed);
        let id = b.id;
        rs.insert_booking(b);

        // moving the booking 30 minutes later overlaps itself — allowed
        let shifted = Span::new(10 * H + 30 * M, 11 * H + 30 * M);
        assert!(check_is_free_excluding(&rs, &shifted, id).is_ok());
        assert!(check_is_free(&rs, &shifted).is_err());
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("Budi Santoso").is_ok());
        assert!(validate_name("B").is_err());
        assert!(validate_name("12345").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn phone_validation() {
        assert!(validate_phone(None).is_ok());
        assert!(validate_phone(Some("+62 812-3456-7890")).is_ok());
        assert!(validate_phone(Some("12345")).is_err());
        assert!(validate_phone(Some("not a number at all")).is_err());
    }

    #[test]
    fn span_limits() {
        assert!(validate_span(&Span::new(-5, 100)).is_err());
        assert!(validate_span(&Span::new(0, MAX_VALID_TIMESTAMP_MS + 1)).is_err());
        assert!(validate_span(&Span::new(0, MAX_SPAN_DURATION_MS + 1)).is_err());
        assert!(validate_span(&Span::new(1000, 2000)).is_ok());
    }
}
