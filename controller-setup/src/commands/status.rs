// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `status`: the supervisor's view of the controller services.

use super::migrate::NOT_CONFIGURED;
use crate::context::SetupContext;
use crate::error::SetupError;
use crate::mode::Mode;
use controller_utils::cmd::{EXIT_FAILURE, EXIT_SUCCESS};

/// Exit status while the supervisor is restarting.
pub const EXIT_RESTARTING: i32 = -1;

pub fn run(ctx: &SetupContext) -> Result<i32, SetupError> {
    ctx.ensure_root("status")?;
    if ctx.mode_store().get()? == Mode::None {
        ctx.console.print(NOT_CONFIGURED);
        return Ok(EXIT_FAILURE);
    }

    let status = ctx.supervisor().status()?;
    if status.code == EXIT_SUCCESS {
        ctx.console.write_inline(&status.output);
        Ok(EXIT_SUCCESS)
    } else if status.is_restarting() {
        ctx.console.print(
            "MAAS supervisor is currently restarting. Please wait and try \
             again.",
        );
        Ok(EXIT_RESTARTING)
    } else {
        ctx.console.write_inline(&status.output);
        Ok(status.code)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::TestEnv;
    use controller_utils::{Output, OutputExt};

    const RUNNING: &str = "rackd                 RUNNING   pid 812, uptime 0:10:02\n";

    fn configured(name: &str) -> TestEnv {
        let env = TestEnv::new(name);
        env.context(true).mode_store().set(Mode::Rack).unwrap();
        env
    }

    #[test]
    fn test_not_configured() {
        let env = TestEnv::new("test_status_not_configured");
        assert_eq!(run(&env.context(true)).unwrap(), 1);
        assert_eq!(env.console.stdout(), "MAAS is not configured\n");
        env.cleanup_successful();
    }

    #[test]
    fn test_running() {
        let env = configured("test_status_running");
        env.executor
            .set_wait_handler(Box::new(|_| Output::success().set_stdout(RUNNING)));
        assert_eq!(run(&env.context(true)).unwrap(), 0);
        assert_eq!(env.console.inline(), vec![RUNNING]);
        env.cleanup_successful();
    }

    #[test]
    fn test_restarting() {
        let env = configured("test_status_restarting");
        env.executor.set_wait_handler(Box::new(|_| {
            Output::exit_code(2).set_stdout(
                "error: <class 'FileNotFoundError'>, [Errno 2] No such file",
            )
        }));
        assert_eq!(run(&env.context(true)).unwrap(), EXIT_RESTARTING);
        assert!(env.console.stdout().contains("currently restarting"));
        assert!(env.console.inline().is_empty());
        env.cleanup_successful();
    }

    #[test]
    fn test_failed_service_code_is_mirrored() {
        let env = configured("test_failed_service_code_is_mirrored");
        env.executor.set_wait_handler(Box::new(|_| {
            Output::exit_code(3).set_stdout("rackd   FATAL   Exited too quickly\n")
        }));
        assert_eq!(run(&env.context(true)).unwrap(), 3);
        assert_eq!(
            env.console.inline(),
            vec!["rackd   FATAL   Exited too quickly\n"]
        );
        env.cleanup_successful();
    }
}
