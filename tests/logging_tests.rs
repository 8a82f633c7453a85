use pvwallbox::logging::{LogContext, get_logger_with_context, parse_log_level};
use tracing::Level;

#[test]
fn parse_log_level_accepts_common_spellings() {
    assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
    assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
    assert!(parse_log_level("loud").is_err());
}

#[test]
fn logger_with_context_does_not_panic_without_subscriber() {
    let logger = get_logger_with_context(
        LogContext::new("test")
            .with_device_id(3)
            .with_field("cycle", "1".to_string()),
    );
    logger.info("message");
    logger.for_device(4).warn("other device");
}
