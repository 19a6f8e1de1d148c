//! Cortex-M4 port
//!
//! Context switching rides the PendSV exception: the kernel raises
//! it with `yield_request`, and the handler saves the outgoing
//! task's callee-saved registers on its process stack, swaps the
//! current/next TCB pointers, and restores the incoming task.
//! SysTick supplies the periodic tick.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::register::primask;

use crate::types::{StackElement, TaskEntry};

/// Saved interrupt state: whether interrupts were enabled
pub type IntState = bool;

/// Dedicated main stack for exception entry after startup
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0; 256];

/// Program SysTick to fire the system tick at `rate_hz`.
pub fn tick_enable(rate_hz: u32, cpu_clock_hz: u32) {
    let reload = (cpu_clock_hz / rate_hz).max(1);
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(reload - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Request a deferred context switch at the next safe point.
#[inline(always)]
pub fn yield_request() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Mask interrupts, reporting whether they were enabled before.
#[inline(always)]
pub fn interrupts_disable() -> IntState {
    let was_active = primask::read().is_active();
    cortex_m::interrupt::disable();
    was_active
}

/// Restore the interrupt state captured by `interrupts_disable`.
#[inline(always)]
pub fn interrupts_restore(state: IntState) {
    if state {
        unsafe { cortex_m::interrupt::enable() };
    }
}

/// Park the CPU until the next interrupt; used by the idle task.
#[inline(always)]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// Register frame as laid down for an initial context restore
#[repr(C, align(4))]
struct TaskFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    /// LR value for the exception return
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

const FRAME_WORDS: usize = 17;

/// Fabricate an initial frame so the first restore enters
/// `entry(param)` in thread mode on the process stack.
///
/// # Safety
/// `stack_top` must point one past a writable, owned stack region
/// large enough for the frame.
pub unsafe fn stack_init(
    stack_top: *mut StackElement,
    entry: TaskEntry,
    param: *mut (),
) -> *mut StackElement {
    unsafe {
        let aligned = ((stack_top as usize) & !7) as *mut u32;
        let frame = aligned.sub(FRAME_WORDS) as *mut TaskFrame;

        (*frame) = TaskFrame {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            exc_return: 0xFFFF_FFFD,
            r0: param as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: task_exit as *const () as u32,
            pc: (entry as usize as u32) | 1,
            xpsr: 0x0100_0000,
        };

        // One word below the frame, matching the "add r0, r0, #4" in
        // the PendSV restore path
        (frame as *mut u32).sub(1) as *mut StackElement
    }
}

/// Hand control to the first selected task.
///
/// Sets exception priorities, moves MSP to the dedicated interrupt
/// stack, and raises PendSV; the handler sees a null current TCB and
/// restores the first task without saving anything.
///
/// # Safety
/// Must only be called once, by `kernel::start`, with the switch
/// state pointing at a valid first task.
#[allow(static_mut_refs)]
pub unsafe fn start_first_task() {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;

        // Context switch and tick run at the lowest priority
        scb.set_priority(SystemHandler::PendSV, 0xF0);
        scb.set_priority(SystemHandler::SysTick, 0xF0);

        let msp_top = INTERRUPT_STACK.as_ptr() as u32
            + core::mem::size_of_val(&INTERRUPT_STACK) as u32;
        asm!("msr msp, {0}", in(reg) msp_top);
        asm!("msr psp, {0}", in(reg) 0);

        crate::kernel::KERNEL_CPU_STATE.cur = core::ptr::null_mut();

        cortex_m::interrupt::enable();
        cortex_m::peripheral::SCB::set_pendsv();
    }
}

/// Swap the live TCB pointer; returns the incoming task's saved SP.
///
/// Called from the PendSV handler with the outgoing SP already
/// captured.
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    unsafe {
        let state = core::ptr::addr_of_mut!(crate::kernel::KERNEL_CPU_STATE);

        if !(*state).cur.is_null() {
            (*(*state).cur).stack_ptr = cur_sp;
        }
        (*state).cur = (*state).next;

        if (*state).cur.is_null() {
            core::ptr::null_mut()
        } else {
            (*(*state).cur).stack_ptr
        }
    }
}

/// PendSV exception handler: the context switch itself.
///
/// 1. Save R4-R11 and LR to the outgoing task's PSP (skipped for the
///    first switch).
/// 2. Swap TCB pointers via `pendsv_switch_context`.
/// 3. Restore R4-R11 and LR from the incoming task's stack.
/// 4. Exception return into the incoming task.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    use crate::kernel::KERNEL_CPU_STATE;

    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r1, ={cpu_state}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",

        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",

        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",

        cpu_state = sym KERNEL_CPU_STATE,
    );
}

/// Landing pad for a task entry that returns; parks forever.
#[no_mangle]
fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
