//! `touch` namespace: single-point capacitive touch panel.
//!
//! Convention: [`ErrorConvention::Sentinel`]. Nothing here blocks; `read`
//! polls the controller once and remembers the last point it saw.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use tracing::{info, warn};

use crate::{
    bridge::{ErrorConvention, Namespace, NativeError},
    capabilities::display::{HEIGHT, WIDTH},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchSample {
    Pressed { x: u16, y: u16 },
    Released,
    /// The controller has no new data.
    Idle,
}

pub trait TouchPanel {
    fn init(&mut self) -> Result<(), NativeError>;
    fn poll(&mut self) -> Result<TouchSample, NativeError>;
    /// Level of the controller's interrupt line: a finger is down right now.
    fn interrupt_active(&self) -> bool;
}

/// Panel that replays a queue of samples, then reports `Idle`.
#[derive(Debug, Default)]
pub struct ScriptedTouch {
    samples: VecDeque<Result<TouchSample, NativeError>>,
    pressed: bool,
    absent: bool,
}

impl ScriptedTouch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panel whose controller never answers.
    pub fn absent() -> Self {
        Self {
            absent: true,
            ..Self::default()
        }
    }

    pub fn push(&mut self, sample: TouchSample) {
        self.samples.push_back(Ok(sample));
    }

    pub fn push_error(&mut self, err: NativeError) {
        self.samples.push_back(Err(err));
    }
}

impl TouchPanel for ScriptedTouch {
    fn init(&mut self) -> Result<(), NativeError> {
        if self.absent {
            return Err(NativeError::failed("touch controller not found"));
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<TouchSample, NativeError> {
        let sample = self.samples.pop_front().unwrap_or(Ok(TouchSample::Idle));
        match sample {
            Ok(TouchSample::Pressed { .. }) => self.pressed = true,
            Ok(TouchSample::Released) => self.pressed = false,
            _ => {}
        }
        sample
    }

    fn interrupt_active(&self) -> bool {
        self.pressed
    }
}

#[derive(Debug, Default)]
struct TouchState {
    initialized: bool,
    last: (u16, u16),
    touched: bool,
}

pub fn namespace(panel: Rc<RefCell<dyn TouchPanel>>) -> Namespace {
    let state = Rc::new(RefCell::new(TouchState::default()));

    Namespace::new("touch", ErrorConvention::Sentinel)
        .constant("WIDTH", WIDTH)
        .constant("HEIGHT", HEIGHT)
        .function("init", {
            let (panel, state) = (panel.clone(), state.clone());
            move |_, ()| {
                let mut state = state.borrow_mut();
                if state.initialized {
                    return Ok(true);
                }
                match panel.borrow_mut().init() {
                    Ok(()) => {
                        state.initialized = true;
                        info!("touch panel initialized");
                        Ok(true)
                    }
                    Err(err) => {
                        warn!("touch panel init failed: {err}");
                        Ok(false)
                    }
                }
            }
        })
        // A failed poll keeps the last point and reports it as released.
        .function("read", {
            let (panel, state) = (panel.clone(), state.clone());
            move |_, ()| {
                let mut state = state.borrow_mut();
                if !state.initialized {
                    return Ok((None, None, false));
                }
                match panel.borrow_mut().poll() {
                    Ok(TouchSample::Pressed { x, y }) => {
                        state.last = (x, y);
                        state.touched = true;
                    }
                    Ok(TouchSample::Released) => state.touched = false,
                    Ok(TouchSample::Idle) => {}
                    Err(_) => {
                        let (x, y) = state.last;
                        return Ok((Some(i64::from(x)), Some(i64::from(y)), false));
                    }
                }
                let (x, y) = state.last;
                Ok((Some(i64::from(x)), Some(i64::from(y)), state.touched))
            }
        })
        .function("is_touched", {
            let (panel, state) = (panel.clone(), state.clone());
            move |_, ()| Ok(state.borrow().initialized && panel.borrow().interrupt_active())
        })
        .function("get_point", {
            let state = state.clone();
            move |_, ()| {
                let (x, y) = state.borrow().last;
                Ok((i64::from(x), i64::from(y)))
            }
        })
}
