#![no_main]
use libfuzzer_sys::fuzz_target;
use pvwallbox::wallbox::ChargeRequestState;

fuzz_target!(|data: &[u8]| {
    // Interpret the input as u16 register stream in big-endian pairs
    let regs: Vec<u16> = data
        .chunks_exact(2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .collect();

    // Exercise the decoders under varying lengths
    let _ = pvwallbox::modbus::decode_u16(&regs);
    let _ = pvwallbox::modbus::decode_u32_low_word_first(&regs);
    if let Some(&raw) = regs.first() {
        if let Ok(state) = ChargeRequestState::from_register(raw) {
            assert!(matches!(raw, 2..=7));
            let _ = state.code();
        }
    }
});
