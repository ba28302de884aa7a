use crate::error::ParseError;

/// The command names this session understands, in their canonical
/// uppercase spelling. `EXIT` is included even though it carries no
/// dataset-level semantics — it still has to pass the "known command"
/// gate before the session treats it as a shutdown signal.
pub const KNOWN_COMMANDS: &[&str] = &[
    "SELECT", "DESELECT", "GET", "SET", "EXPIRE", "TTL", "DEL", "ZADD", "ZRANK", "ZRANGE", "EXIT",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SetArgs {
    pub key: String,
    pub value: Vec<u8>,
    pub ex: Option<i64>,
    pub px: Option<i64>,
    pub nx: bool,
    pub xx: bool,
    pub keepttl: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZaddArgs {
    pub key: String,
    pub nx: bool,
    pub xx: bool,
    pub ch: bool,
    pub incr: bool,
    pub pairs: Vec<(f64, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZrangeArgs {
    pub key: String,
    pub start: i64,
    pub stop: i64,
    pub with_scores: bool,
}

/// A fully parsed command, ready for `Dataset`/`Session` dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCommand {
    Select(String),
    Deselect,
    Get(String),
    Set(SetArgs),
    Expire { key: String, seconds: i64 },
    Ttl(String),
    Del(Vec<String>),
    Zadd(ZaddArgs),
    Zrank { key: String, member: Vec<u8> },
    Zrange(ZrangeArgs),
    Exit,
}

/// Parses `args` (the tokens following the command name) for `name`, the
/// already-uppercased, already-known command name, returning a typed
/// record per command rather than a loose argument list.
pub fn parse(name: &str, args: &[String]) -> Result<ParsedCommand, ParseError> {
    match name {
        "SELECT" => {
            let key = one_arg(name, args)?;
            Ok(ParsedCommand::Select(key))
        }
        "DESELECT" => {
            no_args(name, args)?;
            Ok(ParsedCommand::Deselect)
        }
        "GET" => Ok(ParsedCommand::Get(one_arg(name, args)?)),
        "SET" => Ok(ParsedCommand::Set(parse_set(name, args)?)),
        "EXPIRE" => {
            if args.len() != 2 {
                return Err(ParseError::WrongArgCount(name.to_lowercase()));
            }
            let seconds = parse_int(&args[1])?;
            Ok(ParsedCommand::Expire {
                key: args[0].clone(),
                seconds,
            })
        }
        "TTL" => Ok(ParsedCommand::Ttl(one_arg(name, args)?)),
        "DEL" => {
            if args.is_empty() {
                return Err(ParseError::WrongArgCount(name.to_lowercase()));
            }
            Ok(ParsedCommand::Del(args.to_vec()))
        }
        "ZADD" => Ok(ParsedCommand::Zadd(parse_zadd(name, args)?)),
        "ZRANK" => {
            if args.len() != 2 {
                return Err(ParseError::WrongArgCount(name.to_lowercase()));
            }
            Ok(ParsedCommand::Zrank {
                key: args[0].clone(),
                member: args[1].as_bytes().to_vec(),
            })
        }
        "ZRANGE" => Ok(ParsedCommand::Zrange(parse_zrange(name, args)?)),
        "EXIT" => {
            no_args(name, args)?;
            Ok(ParsedCommand::Exit)
        }
        _ => unreachable!("caller must gate on KNOWN_COMMANDS before calling parse"),
    }
}

fn one_arg(name: &str, args: &[String]) -> Result<String, ParseError> {
    if args.len() != 1 {
        return Err(ParseError::WrongArgCount(name.to_lowercase()));
    }
    Ok(args[0].clone())
}

fn no_args(name: &str, args: &[String]) -> Result<(), ParseError> {
    if !args.is_empty() {
        return Err(ParseError::WrongArgCount(name.to_lowercase()));
    }
    Ok(())
}

fn parse_int(tok: &str) -> Result<i64, ParseError> {
    tok.parse::<i64>().map_err(|_| ParseError::NotInteger)
}

fn parse_float(tok: &str) -> Result<f64, ParseError> {
    tok.parse::<f64>().map_err(|_| ParseError::NotFloat)
}

fn parse_set(name: &str, args: &[String]) -> Result<SetArgs, ParseError> {
    if args.len() < 2 {
        return Err(ParseError::WrongArgCount(name.to_lowercase()));
    }
    let key = args[0].clone();
    let value = args[1].as_bytes().to_vec();

    let mut ex = None;
    let mut px = None;
    let mut nx = false;
    let mut xx = false;
    let mut keepttl = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].to_uppercase().as_str() {
            "-EX" => {
                i += 1;
                let tok = args.get(i).ok_or(ParseError::SyntaxError)?;
                ex = Some(parse_int(tok)?);
            }
            "-PX" => {
                i += 1;
                let tok = args.get(i).ok_or(ParseError::SyntaxError)?;
                px = Some(parse_int(tok)?);
            }
            "-NX" => nx = true,
            "-XX" => xx = true,
            "-KEEPTTL" => keepttl = true,
            _ => return Err(ParseError::SyntaxError),
        }
        i += 1;
    }

    if ex.is_some() && px.is_some() {
        return Err(ParseError::ExPxConflict);
    }
    if nx && xx {
        return Err(ParseError::NxXxConflict);
    }

    Ok(SetArgs {
        key,
        value,
        ex,
        px,
        nx,
        xx,
        keepttl,
    })
}

fn parse_zadd(name: &str, args: &[String]) -> Result<ZaddArgs, ParseError> {
    if args.len() < 3 {
        return Err(ParseError::WrongArgCount(name.to_lowercase()));
    }
    let key = args[0].clone();

    let mut nx = false;
    let mut xx = false;
    let mut ch = false;
    let mut incr = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].to_uppercase().as_str() {
            "-NX" => {
                nx = true;
                i += 1;
            }
            "-XX" => {
                xx = true;
                i += 1;
            }
            "-CH" => {
                ch = true;
                i += 1;
            }
            "-INCR" => {
                incr = true;
                i += 1;
            }
            _ => break,
        }
    }

    if nx && xx {
        return Err(ParseError::NxXxConflict);
    }

    let rest = &args[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(ParseError::OddPairCount);
    }

    let mut pairs = Vec::with_capacity(rest.len() / 2);
    for chunk in rest.chunks(2) {
        let score = parse_float(&chunk[0])?;
        let member = chunk[1].as_bytes().to_vec();
        pairs.push((score, member));
    }

    if incr && pairs.len() != 1 {
        return Err(ParseError::IncrSinglePairOnly);
    }

    Ok(ZaddArgs {
        key,
        nx,
        xx,
        ch,
        incr,
        pairs,
    })
}

fn parse_zrange(name: &str, args: &[String]) -> Result<ZrangeArgs, ParseError> {
    if args.len() < 3 || args.len() > 4 {
        return Err(ParseError::WrongArgCount(name.to_lowercase()));
    }
    let key = args[0].clone();
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    let with_scores = match args.get(3) {
        None => false,
        Some(tok) if tok.to_uppercase() == "-WITHSCORES" => true,
        Some(_) => return Err(ParseError::SyntaxError),
    };
    Ok(ZrangeArgs {
        key,
        start,
        stop,
        with_scores,
    })
}
