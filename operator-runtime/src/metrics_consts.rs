pub const MESSAGES_RECEIVED: &str = "operator_messages_received_total";
pub const MESSAGES_DROPPED: &str = "operator_messages_dropped_total";
pub const RESULTS_PRODUCED: &str = "operator_results_produced_total";
pub const RESULT_ERRORS: &str = "operator_result_errors_total";
pub const HANDLER_TIME: &str = "operator_handler_duration_seconds";
pub const PRODUCER_FLUSHES: &str = "operator_producer_flushes_total";
pub const TRAINING_JOBS_STARTED: &str = "operator_training_jobs_started_total";
pub const TRAINING_CHECK_FAILURES: &str = "operator_training_check_failures_total";
pub const MODELS_INSTALLED: &str = "operator_models_installed_total";
