pub(crate) mod chat;
pub(crate) mod extraction;
pub(crate) mod grading_api;
pub(crate) mod result_ledger;
pub(crate) mod storage;
pub(crate) mod telegram_bot;
