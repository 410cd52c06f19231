// tuberun-runner: the `tuberun` binary's library.
// Depends on `tuberun-sdk` and `tuberun-common`.
//
// Architecture:
//   main → Runner::run → CommandRegistry::load → BeanstalkClient::open_tube
//        → ShutdownCoordinator::install → Dispatcher::run
//   Dispatcher → ConcurrencyLimiter::acquire → ProcessLauncher::launch
//   Dispatcher → RejectionLedger::record → JobQueue::bury

pub mod command_registry;
pub mod command_settings;
pub mod concurrency_limiter;
pub mod dispatcher;
pub mod error_throttler;
pub mod process_launcher;
pub mod rejection_ledger;
pub mod runner;
pub mod shutdown;
