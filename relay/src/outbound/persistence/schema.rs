//! Diesel schema for the outbox table.

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_type -> Varchar,
        aggregate_id -> Varchar,
        event_type -> Varchar,
        payload -> Jsonb,
        topic -> Varchar,
        partition_key -> Varchar,
        status -> Varchar,
        attempt_count -> Int4,
        last_attempt_at -> Nullable<Timestamptz>,
        next_attempt_at -> Nullable<Timestamptz>,
        claimed_by -> Nullable<Varchar>,
        claimed_until -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
    }
}
