use log::{debug, info};
use serial_test::serial;

use crate::core::logger;

#[test]
#[serial]
fn test_setup_teardown() {
    logger::setup();
    info!("logger smoke test: info");
    debug!("logger smoke test: debug");
    logger::teardown();
}
