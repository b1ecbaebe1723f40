//
// low-level driver routines for the 16550a UART.
// output is polled; the receive interrupt is drained and echoed.
//

use crate::memlayout::UART0;
use crate::spinlock::{pop_off, push_off};

// the UART control registers.
// some have different meanings for read vs write.
// see http://byterunner.com/16550.html
const RHR: usize = 0; // receive holding register (for input bytes)
const THR: usize = 0; // transmit holding register (for output bytes)
const IER: usize = 1; // interrupt enable register
const IER_RX_ENABLE: u8 = 1 << 0;
const FCR: usize = 2; // FIFO control register
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
const LCR: usize = 3; // line control register
const LCR_EIGHT_BITS: u8 = 3 << 0;
const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
const LSR: usize = 5; // line status register
const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

fn read_reg(reg: usize) -> u8 {
    unsafe { ((UART0 + reg) as *const u8).read_volatile() }
}

fn write_reg(reg: usize, val: u8) {
    unsafe { ((UART0 + reg) as *mut u8).write_volatile(val) }
}

pub fn uartinit() {
    // disable interrupts.
    write_reg(IER, 0x00);

    // special mode to set baud rate.
    write_reg(LCR, LCR_BAUD_LATCH);

    // LSB and MSB for baud rate of 38.4K.
    write_reg(0, 0x03);
    write_reg(1, 0x00);

    // leave set-baud mode, and set word length to 8 bits, no parity.
    write_reg(LCR, LCR_EIGHT_BITS);

    // reset and enable FIFOs.
    write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

    // enable receive interrupts; transmit stays polled.
    write_reg(IER, IER_RX_ENABLE);
}

// write one output character to the UART, spinning until it has
// room. used by the console printer, which serializes callers with
// its own lock.
pub fn uartputc_sync(c: u8) {
    push_off();

    // wait for Transmit Holding Empty to be set in LSR.
    while read_reg(LSR) & LSR_TX_IDLE == 0 {
        core::hint::spin_loop();
    }
    write_reg(THR, c);

    pop_off();
}

// read one input character from the UART, if any.
pub fn uartgetc() -> Option<u8> {
    if read_reg(LSR) & LSR_RX_READY != 0 {
        Some(read_reg(RHR))
    } else {
        None
    }
}

// handle a uart interrupt: drain the receive FIFO.
pub fn uart_intr() {
    while let Some(c) = uartgetc() {
        crate::console::consoleintr(c);
    }
}
