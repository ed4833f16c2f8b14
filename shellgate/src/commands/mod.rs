pub mod check;
pub mod healthcheck;
pub mod run;
pub mod test_target;
