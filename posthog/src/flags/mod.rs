pub mod decision_cache;
pub mod flag_match_reason;
pub mod flag_matching;
pub mod flag_matching_utils;
pub mod flag_models;
pub mod flag_poller;
pub mod remote_evaluation;
pub mod sent_cache;
