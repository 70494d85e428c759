//! Logging initialization.
//!
//! A thin wrapper around `log` + `log4rs`, matching the shape of
//! `nexuslite`'s `utils/logger.rs` (`init_for_db_in`) but trimmed to the
//! single rolling appender this engine needs — there is no audit or
//! metrics log split to carry over from the document-store features this
//! crate does not implement.

use std::path::Path;

/// Initialize a rolling file logger at `{dir}/ambertree.log`.
///
/// Safe to call more than once; subsequent calls are ignored if a global
/// logger is already installed (`log4rs::init_config` returns an error in
/// that case, which we swallow the same way the teacher's `init_for_db`
/// does).
pub fn init_for_db(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    use log::LevelFilter;
    use log4rs::append::rolling_file::RollingFileAppender;
    use log4rs::append::rolling_file::policy::compound::{
        CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
    };
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    std::fs::create_dir_all(dir)?;
    let log_path = dir.join("ambertree.log");
    let roller =
        FixedWindowRoller::builder().build(&format!("{}", dir.join("ambertree.{}.log").display()), 5)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(roller));
    let encoder = Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}"));
    let appender = RollingFileAppender::builder().encoder(encoder).build(log_path, Box::new(policy))?;
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;
    let _ = log4rs::init_config(config);
    Ok(())
}
