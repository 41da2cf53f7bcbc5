pub(crate) mod poller;
pub(crate) mod supervisor;
