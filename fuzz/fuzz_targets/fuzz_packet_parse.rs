#![no_main]

use libfuzzer_sys::fuzz_target;
use socketio_client::{StrictParser, TolerantParser};

fuzz_target!(|data: &[u8]| {
    // Both protocol layers must reject or accept arbitrary input without
    // panicking.
    let _ = socketio_client::engine::frame::decode(data);

    // Exercise both payload parser implementations over the same input.
    let _ = socketio_client::packet::parse(data, &TolerantParser);
    let _ = socketio_client::packet::parse(data, &StrictParser);
});
