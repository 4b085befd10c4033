//! Hardware, execution and miscellaneous commands.

use cmd::{help, Args, HELP};
use soc::regs::Interrupts;

use super::Zputa;
use crate::exec::{ExecError, APP_CONFIG_ADDR, APP_GLOBALS, APP_MEMREG_ADDR};

pub(super) fn hid(z: &mut Zputa<'_>, _args: Args<'_>) {
    out!(z, "Disabling interrupts\n");
    z.platform.disable_interrupts(Interrupts::TIMER);
}

pub(super) fn hie(z: &mut Zputa<'_>, _args: Args<'_>) {
    out!(z, "Enabling interrupts\n");
    z.platform
        .enable_interrupts(Interrupts::TIMER | Interrupts::UART0_RX);
}

pub(super) fn hfd(z: &mut Zputa<'_>, _args: Args<'_>) {
    z.platform.set_uart_fifo(false);
    out!(z, "Disabled uart fifo\n");
}

pub(super) fn hfe(z: &mut Zputa<'_>, _args: Args<'_>) {
    out!(z, "Enabling uart fifo\n");
    z.platform.set_uart_fifo(true);
}

pub(super) fn jmp(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(addr) = args.next_addr() else {
        return;
    };
    out!(z, "Executing code @ {addr:08x} ...\n");
    z.machine.jump(&mut z.mem, &mut *z.console, addr);
}

pub(super) fn call(z: &mut Zputa<'_>, mut args: Args<'_>) {
    let Some(addr) = args.next_addr() else {
        return;
    };
    out!(z, "Calling code @ {addr:08x} ...\n");
    let abi = [0, 0, APP_MEMREG_ADDR, APP_GLOBALS, APP_CONFIG_ADDR];
    match z.machine.call(&mut z.mem, &mut *z.console, addr, abi) {
        Ok(0) => {}
        Ok(code) => out!(z, "Call returned code ({}).\n", code as i32),
        Err(fault) => out!(z, "{}\n", ExecError::Fault(fault)),
    }
}

pub(super) fn restart(z: &mut Zputa<'_>, _args: Args<'_>) {
    out!(z, "Restarting application...\n");
    z.platform.restart();
}

pub(super) fn reset(z: &mut Zputa<'_>, _args: Args<'_>) {
    out!(z, "Cold rebooting...\n");
    z.platform.reboot();
}

pub(super) fn help(z: &mut Zputa<'_>, args: Args<'_>) {
    let filter = args.rest();
    if filter.is_empty() {
        z.version(false);
    }
    let _ = help::render(&z.table, HELP, filter, &mut &mut *z.console);
}

pub(super) fn info(z: &mut Zputa<'_>, _args: Args<'_>) {
    let cfg = z.cfg;
    out!(z, "{cfg}");
}

pub(super) fn test(_z: &mut Zputa<'_>, _args: Args<'_>) {}
