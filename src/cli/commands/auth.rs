use crate::auth::code::{DEFAULT_CODE_DIGITS, MAX_CODE_DIGITS, MIN_CODE_DIGITS};
use crate::auth::policy::{
    AuthPolicy, DEFAULT_CHALLENGE_TTL_SECONDS, DEFAULT_PUSH_TIMEOUT_MILLIS,
    DEFAULT_PUSH_TTL_SECONDS,
};
use clap::{builder::BoolishValueParser, Arg, ArgMatches, Command};

pub const ARG_DEVICE_UNIQUENESS: &str = "device-uniqueness";
pub const ARG_OTP_EXPIRY: &str = "otp-expiry";
pub const ARG_CLEAR_OTP_ON_SUCCESS: &str = "clear-otp-on-success";
pub const ARG_CHALLENGE_TTL_SECONDS: &str = "challenge-ttl-seconds";
pub const ARG_PUSH_TTL_SECONDS: &str = "push-ttl-seconds";
pub const ARG_PUSH_TIMEOUT_MS: &str = "push-timeout-ms";
pub const ARG_STATIC_OTP: &str = "static-otp";
pub const ARG_OTP_DIGITS: &str = "otp-digits";

#[derive(Debug, Clone)]
pub struct Options {
    pub policy: AuthPolicy,
    /// Hand out this code instead of a random one. Development only.
    pub static_otp: Option<String>,
    pub otp_digits: usize,
}

impl Options {
    /// Parse policy arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the static code is not made of digits or the code
    /// length is out of range.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let flag = |id: &str, default: bool| matches.get_one::<bool>(id).copied().unwrap_or(default);

        let policy = AuthPolicy::new()
            .with_device_uniqueness(flag(ARG_DEVICE_UNIQUENESS, false))
            .with_otp_expiry(flag(ARG_OTP_EXPIRY, true))
            .with_clear_otp_on_success(flag(ARG_CLEAR_OTP_ON_SUCCESS, true))
            .with_challenge_ttl_seconds(
                matches
                    .get_one::<i64>(ARG_CHALLENGE_TTL_SECONDS)
                    .copied()
                    .unwrap_or(DEFAULT_CHALLENGE_TTL_SECONDS),
            )
            .with_push_ttl_seconds(
                matches
                    .get_one::<i64>(ARG_PUSH_TTL_SECONDS)
                    .copied()
                    .unwrap_or(DEFAULT_PUSH_TTL_SECONDS),
            )
            .with_push_timeout_millis(
                matches
                    .get_one::<u64>(ARG_PUSH_TIMEOUT_MS)
                    .copied()
                    .unwrap_or(DEFAULT_PUSH_TIMEOUT_MILLIS),
            )
            .normalize();

        let static_otp = matches
            .get_one::<String>(ARG_STATIC_OTP)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        if let Some(code) = &static_otp {
            if !code.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("--{ARG_STATIC_OTP} must contain only digits");
            }
        }

        let otp_digits = matches
            .get_one::<usize>(ARG_OTP_DIGITS)
            .copied()
            .unwrap_or(DEFAULT_CODE_DIGITS);
        if !(MIN_CODE_DIGITS..=MAX_CODE_DIGITS).contains(&otp_digits) {
            anyhow::bail!(
                "--{ARG_OTP_DIGITS} must be between {MIN_CODE_DIGITS} and {MAX_CODE_DIGITS}"
            );
        }

        Ok(Self {
            policy,
            static_otp,
            otp_digits,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_policy_args(command);
    with_challenge_args(command)
}

fn with_policy_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DEVICE_UNIQUENESS)
                .long(ARG_DEVICE_UNIQUENESS)
                .help("Reject registering a device already bound to another mobile number")
                .env("NOPASS_DEVICE_UNIQUENESS")
                .default_value("false")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_OTP_EXPIRY)
                .long(ARG_OTP_EXPIRY)
                .help("Expire challenge codes after --challenge-ttl-seconds")
                .env("NOPASS_OTP_EXPIRY")
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_CLEAR_OTP_ON_SUCCESS)
                .long(ARG_CLEAR_OTP_ON_SUCCESS)
                .help("Clear the challenge code once it has been verified")
                .env("NOPASS_CLEAR_OTP_ON_SUCCESS")
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_PUSH_TTL_SECONDS)
                .long(ARG_PUSH_TTL_SECONDS)
                .help("Answer window advertised in login push messages")
                .env("NOPASS_PUSH_TTL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_PUSH_TIMEOUT_MS)
                .long(ARG_PUSH_TIMEOUT_MS)
                .help("Timeout for a single push delivery in milliseconds")
                .env("NOPASS_PUSH_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_challenge_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CHALLENGE_TTL_SECONDS)
                .long(ARG_CHALLENGE_TTL_SECONDS)
                .help("Challenge code lifetime in seconds")
                .env("NOPASS_CHALLENGE_TTL_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OTP_DIGITS)
                .long(ARG_OTP_DIGITS)
                .help("Number of digits in generated challenge codes")
                .env("NOPASS_OTP_DIGITS")
                .default_value("6")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_STATIC_OTP)
                .long(ARG_STATIC_OTP)
                .help("Always issue this challenge code (development only, e.g. 9999)")
                .env("NOPASS_STATIC_OTP"),
        )
}
