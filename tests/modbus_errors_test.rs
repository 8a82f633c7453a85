use pvwallbox::modbus::{decode_u16, decode_u32_low_word_first};
use pvwallbox::wallbox::ChargeRequestState;

#[test]
fn decode_u32_insufficient_registers() {
    let regs = [0x1234u16];
    assert!(decode_u32_low_word_first(&regs).is_err());
}

#[test]
fn decode_u16_empty_response() {
    assert!(decode_u16(&[]).is_err());
}

#[test]
fn unknown_charging_state_is_rejected() {
    for raw in [0u16, 1, 8, 0xFFFF] {
        let err = ChargeRequestState::from_register(raw).unwrap_err();
        assert!(!err.is_connection_error());
    }
}
