//! Crank (PA0, EXTI0) and cam (PB1, EXTI1) rising-edge interrupts.
//!
//! The lines are configured directly so the handlers can stamp each edge from
//! TIM2 on entry.

use embassy_stm32::pac;

/// EXTI line of the crank input.
pub const CRANK_LINE: usize = 0;
/// EXTI line of the cam input.
pub const CAM_LINE: usize = 1;

const PORT_A: u8 = 0;
const PORT_B: u8 = 1;

/// Routes PA0/PB1 to their EXTI lines and unmasks rising edges.
pub fn init_trigger_lines() {
    pac::RCC.apb2enr().modify(|w| w.set_syscfgen(true));
    pac::SYSCFG.exticr(0).modify(|w| {
        w.set_exti(CRANK_LINE, PORT_A);
        w.set_exti(CAM_LINE, PORT_B);
    });
    for line in [CRANK_LINE, CAM_LINE] {
        pac::EXTI.ftsr(0).modify(|w| w.set_line(line, false));
        pac::EXTI.rtsr(0).modify(|w| w.set_line(line, true));
        clear_pending(line);
        pac::EXTI.imr(0).modify(|w| w.set_line(line, true));
    }
}

/// Acknowledges an edge; the pending register is write-one-to-clear.
pub fn clear_pending(line: usize) {
    pac::EXTI.pr(0).write(|w| w.set_line(line, true));
}
