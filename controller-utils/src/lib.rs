// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wrappers around host facilities used by the controller setup tooling:
//! running external commands, polling for conditions, switching identities
//! and delivering signals.

pub mod cmd;
pub mod fs;
pub mod host;
pub mod poll;
pub mod privilege;
pub mod process;

pub use host::error::{CommandFailureInfo, ExecutionError};
pub use host::executor::{BoxedExecutor, Executor, FakeExecutor, HostExecutor};
pub use host::input::Input;
pub use host::output::{Output, OutputExt};
