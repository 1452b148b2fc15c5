//! Peripheral blocks: CPU core registers, clock system, oscillators,
//! interrupt controller, general-purpose registers, timer/counters.

pub mod clk;
pub mod cpu;
pub mod gpior;
pub mod osc;
pub mod pmic;
pub mod tc;

pub use clk::Clk;
pub use cpu::{Cpu, Sreg};
pub use gpior::Gpior;
pub use osc::Osc;
pub use pmic::Pmic;
pub use tc::{Tc, TcInstance, TCC0};
