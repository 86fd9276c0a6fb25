#![no_main]
use hookcore::{Cartridge, Session, SessionConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(cart) = Cartridge::from_program(&[0xEA], &[]) else {
        return;
    };
    let mut session = Session::nes(cart, SessionConfig::default());
    let before = session.get_state();
    if session.restore_state(data).is_err() {
        // A rejected blob leaves the machine untouched
        assert_eq!(session.get_state(), before);
    }
});
