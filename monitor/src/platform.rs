use soc::regs::Interrupts;

/// Board services the monitor needs beyond memory, the console and the disks.
pub trait Platform {
    fn disable_interrupts(&mut self, sources: Interrupts);

    fn enable_interrupts(&mut self, sources: Interrupts);

    /// Switches the UART transmit and receive FIFOs on or off.
    fn set_uart_fifo(&mut self, enabled: bool);

    /// Milliseconds since the last [`Platform::reset_millis`].
    fn millis(&self) -> u32;

    fn reset_millis(&mut self);

    /// Whole seconds since start up, as counted by the timer interrupt.
    fn ticks(&self) -> u32;

    /// Starts the running program again from its entry point.
    fn restart(&mut self) -> !;

    /// Cold boots the SoC into the boot program.
    fn reboot(&mut self) -> !;
}
