pub const MESSAGES_FETCHED: &str = "queue_consumer_messages_fetched";
pub const FETCH_BATCH_SIZE: &str = "queue_consumer_fetch_batch_size";
pub const MESSAGES_ACKED: &str = "queue_consumer_messages_acked";
// Labeled with the kind of error, see `ConsumerError::kind`.
pub const CONSUMER_ERRORS: &str = "queue_consumer_errors";
pub const HANDLER_DURATION: &str = "queue_consumer_handler_duration_seconds";
pub const HANDLER_PANICS: &str = "queue_consumer_handler_panics";
// Share of workers busy with a message, sampled before every dispatch.
pub const WORKER_SATURATION: &str = "queue_consumer_worker_saturation";
// Leases created and not yet cleaned up, whether waiting for a worker or being handled.
pub const LEASES_IN_FLIGHT: &str = "queue_consumer_leases_in_flight";
pub const LEASES_EXPIRED: &str = "queue_consumer_leases_expired";
// Labeled with the outcome of the attempt, "success" or "failure".
pub const RENEWALS: &str = "queue_consumer_renewals";
