//! `epfabric` is an event-driven message broker that links heterogeneous
//! data sources — Unix-domain and TCP sockets, serial ports, GPIO lines,
//! SPI and I2C buses, and sysfs attributes — behind one uniform "endpoint"
//! abstraction. Endpoints are paired with [`bind`]; the broker then routes
//! length-prefixed framed messages between them, so a process talking to a
//! local socket can transparently drive hardware on the same host.
//!
//! A single-threaded reactor (§4.1) drives everything: call [`init`] once
//! per thread, open and bind endpoints, optionally stand up a [`switch`] or
//! [`loopback`] for many-way fan-out, then call [`dispatch`] to service
//! readiness. [`shutdown`] tears the broker down.
//!
//! ```no_run
//! epfabric::init().unwrap();
//! let a = epfabric::open("ipc://@/tmp/a").unwrap();
//! let b = epfabric::open("ipc://@/tmp/b").unwrap();
//! epfabric::bind(a, b).unwrap();
//! epfabric::dispatch(Some(std::time::Duration::from_millis(100))).unwrap();
//! epfabric::shutdown();
//! ```

mod broker;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod kinds;
pub mod loopback;
pub mod payload;
pub mod peer;
pub mod reactor;
pub mod registry;
pub mod session;
pub mod slab;
pub mod switch;
pub mod token;
pub mod uri;

pub use endpoint::{Compatibility, EndpointKind, EndpointOps};
pub use error::{Error, Result};
pub use session::NO_EXIT_ON_ERR;

// The public operations (C10). Free functions over thread-local broker
// state, per the "global/thread-local loop" design note (§9): every other
// component in this crate (registry, sessions, switches, loopbacks) is a
// plain struct a caller could also own directly and drive by hand; these
// wrappers are the convenience surface most callers want instead.
pub use broker::{
    bind, close, connect, dispatch, evsend, evxfer, gpio_send, gpio_xfer, i2c_send, i2c_xfer,
    init, loopback_evxfer, loopback_gpio_xfer, loopback_i2c_xfer, loopback_setcb,
    loopback_spi_xfer, loopback_sysfs_xfer, loopback_xfer, open, port, port_close, port_setcb,
    reinit, send, setcb, shutdown, spi_send, spi_xfer, switch_create, switch_setcb, sysfs_send,
    sysfs_xfer, unbind, xfer,
};
