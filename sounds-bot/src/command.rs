use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_till1, take_while1},
    character::complete::{char, digit1, satisfy},
    combinator::{all_consuming, map, map_opt, opt, rest, value},
    error::Error,
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish, IResult,
};

/// A chat message understood by the bot.
///
/// Parsing tries each form in a fixed order and the first one that matches
/// wins. `play`, `remove`, `punish` and `list sounds` only need to match at
/// the start of the message; the other forms must span the whole message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play { name: String },
    Remove { name: String },
    SetConfig { key: String, value: String },
    ShowConf,
    Punish { target: String, minutes: Option<i64> },
    Help,
    ListSounds,
    ShowLogs,
    Download { url: String, name: String },
    Pad { name: String },
    Trim { name: String, from: String, to: String },
    Fade { name: String },
}

impl Command {
    /// Admin-only commands produce no reply at all for everyone else.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::Remove { .. } | Self::SetConfig { .. } | Self::ShowConf | Self::Punish { .. }
        )
    }
}

impl FromStr for Command {
    type Err = Error<String>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match command(s).finish() {
            Ok((_remaining, command)) => Ok(command),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}

fn sep(i: &str) -> IResult<&str, char> {
    satisfy(char::is_whitespace)(i)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '\'' || c == ' '
}

fn sound_name(i: &str) -> IResult<&str, String> {
    map(take_while1(is_name_char), |s: &str| s.trim().to_owned())(i)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(word), sep)
}

fn config_token(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(i)
}

fn play(i: &str) -> IResult<&str, Command> {
    map(preceded(keyword("play"), sound_name), |name| Command::Play {
        name,
    })(i)
}

fn remove(i: &str) -> IResult<&str, Command> {
    map(preceded(keyword("remove"), sound_name), |name| {
        Command::Remove { name }
    })(i)
}

fn set_config(i: &str) -> IResult<&str, Command> {
    map(
        all_consuming(tuple((
            keyword("set"),
            config_token,
            sep,
            keyword("to"),
            config_token,
        ))),
        |(_, key, _, _, value)| Command::SetConfig {
            key: key.to_owned(),
            value: value.to_owned(),
        },
    )(i)
}

fn show_conf(i: &str) -> IResult<&str, Command> {
    value(
        Command::ShowConf,
        all_consuming(pair(keyword("show"), tag_no_case("conf"))),
    )(i)
}

/// `punish <@U123> 10`, `punish <@U123|bob>` or `punish @bob 10`.
fn punish(i: &str) -> IResult<&str, Command> {
    let mention = delimited(
        pair(opt(char('<')), char('@')),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        pair(
            opt(preceded(char('|'), take_till1(|c: char| c == '>'))),
            opt(char('>')),
        ),
    );
    let minutes = preceded(opt(sep), opt(map_opt(digit1, |d: &str| d.parse::<i64>().ok())));
    map(
        preceded(keyword("punish"), pair(mention, minutes)),
        |(target, minutes): (&str, Option<i64>)| Command::Punish {
            target: target.to_owned(),
            minutes,
        },
    )(i)
}

fn help(i: &str) -> IResult<&str, Command> {
    value(Command::Help, all_consuming(tag_no_case("help")))(i)
}

fn list_sounds(i: &str) -> IResult<&str, Command> {
    value(
        Command::ListSounds,
        pair(keyword("list"), tag_no_case("sounds")),
    )(i)
}

fn show_logs(i: &str) -> IResult<&str, Command> {
    value(
        Command::ShowLogs,
        all_consuming(pair(keyword("show"), tag_no_case("logs"))),
    )(i)
}

/// Strips the `<url>` / `<url|label>` wrapping chat clients add to links.
fn unwrap_link(token: &str) -> Option<String> {
    let token = token.strip_prefix('<').unwrap_or(token);
    let token = token.strip_suffix('>').unwrap_or(token);
    let url = token.split('|').next()?;
    let lower = url.to_ascii_lowercase();
    let host = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))?;
    let mut chars = host.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(_)) if !matches!(first, '/' | '$' | '.' | '?' | '#') => {
            Some(url.to_owned())
        }
        _ => None,
    }
}

fn download(i: &str) -> IResult<&str, Command> {
    let url = map_opt(take_till1(char::is_whitespace), unwrap_link);
    let name = take_while1(|c: char| is_name_char(c) || matches!(c, ':' | '/' | '|'));
    map(
        all_consuming(tuple((keyword("download"), url, sep, name))),
        |(_, url, _, name): (_, String, _, &str)| Command::Download {
            url,
            name: name.trim().to_owned(),
        },
    )(i)
}

fn pad(i: &str) -> IResult<&str, Command> {
    map(
        all_consuming(preceded(keyword("pad"), sound_name)),
        |name| Command::Pad { name },
    )(i)
}

fn is_seconds(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// `trim <name> <from> <to>`; the name may contain spaces, so the two
/// numbers are taken from the end.
fn trim_args(i: &str) -> Option<Command> {
    let mut parts = i.rsplitn(3, char::is_whitespace);
    let to = parts.next()?;
    let from = parts.next()?;
    let name = parts.next()?;
    if !is_seconds(from) || !is_seconds(to) || name.is_empty() || !name.chars().all(is_name_char)
    {
        return None;
    }
    Some(Command::Trim {
        name: name.trim().to_owned(),
        from: from.to_owned(),
        to: to.to_owned(),
    })
}

fn trim(i: &str) -> IResult<&str, Command> {
    preceded(keyword("trim"), map_opt(rest, trim_args))(i)
}

fn fade(i: &str) -> IResult<&str, Command> {
    map(
        all_consuming(preceded(keyword("fade"), sound_name)),
        |name| Command::Fade { name },
    )(i)
}

fn command(input: &str) -> IResult<&str, Command> {
    alt((
        play,
        remove,
        set_config,
        show_conf,
        punish,
        help,
        list_sounds,
        show_logs,
        download,
        pad,
        trim,
        fade,
    ))(input)
}
