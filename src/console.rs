//
// console output, one character at a time, over the polled UART.
// input is echo-only; this kernel's user programs never read the
// console.
//

use crate::uart::{uartinit, uartputc_sync};

const BACKSPACE: u8 = 0x08;

pub fn consoleinit() {
    uartinit();
}

// send one character to the uart.
// called by the printer and to echo input characters.
pub fn consputc(c: u8) {
    if c == 0x7f {
        // if the user typed backspace, overwrite with a space.
        uartputc_sync(BACKSPACE);
        uartputc_sync(b' ');
        uartputc_sync(BACKSPACE);
    } else {
        uartputc_sync(c);
    }
}

// the console input interrupt handler: echo what arrived.
pub fn consoleintr(c: u8) {
    match c {
        b'\r' => consputc(b'\n'),
        _ => consputc(c),
    }
}
