pub(crate) mod cancellation;
pub(crate) mod events;
pub(crate) mod machine;
pub(crate) mod results;
pub(crate) mod session;
