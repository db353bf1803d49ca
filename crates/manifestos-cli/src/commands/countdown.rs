use clap::{Args, ValueEnum};
use manifestos_core::verification::{format_remaining, Clock, SystemClock};
use manifestos_core::{CountdownKind, VerificationTimer};

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    Start,
    Finish,
}

impl From<KindArg> for CountdownKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Start => CountdownKind::Start,
            KindArg::Finish => CountdownKind::Finish,
        }
    }
}

#[derive(Args)]
pub struct CountdownArgs {
    /// Countdown style
    #[arg(long, value_enum, default_value = "start")]
    kind: KindArg,
    /// Remaining seconds
    #[arg(long)]
    seconds: u64,
    /// Run the countdown in real time, printing once per second
    #[arg(long)]
    follow: bool,
}

pub fn run(args: CountdownArgs) -> Result<(), Box<dyn std::error::Error>> {
    let kind = CountdownKind::from(args.kind);
    if !args.follow {
        println!("{}", format_remaining(kind, args.seconds));
        return Ok(());
    }

    let clock = SystemClock;
    let mut timer = VerificationTimer::starting_at(clock.now(), args.seconds, kind)
        .on_timeout(|timeout| eprintln!("{} countdown expired at {}", timeout.kind, timeout.deadline));
    println!("{}", timer.display());
    while !timer.is_expired() {
        std::thread::sleep(std::time::Duration::from_secs(1));
        timer.tick(clock.now());
        println!("{}", timer.display());
    }
    Ok(())
}
