use crate::config::ServiceConfig;

pub fn setup_logging(config: &ServiceConfig) {
    common::setup_logging(config.environment);
}
