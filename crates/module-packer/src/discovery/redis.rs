#![forbid(unsafe_code)]

//! Command discovery backed by a throwaway `redis-server` process.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::resp::{self, RespValue};
use super::{CommandDiscovery, DiscoveredModule, DiscoveryError};
use crate::config::DiscoveryConfig;
use crate::metadata::{CommandDescriptor, ModuleVersion};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOG_TAIL_LINES: usize = 5;

/// Discovers module commands by diffing `COMMAND` output between a vanilla
/// host and one started with `--loadmodule`.
#[derive(Debug, Clone)]
pub struct RedisServerDiscovery {
    config: DiscoveryConfig,
}

impl RedisServerDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    fn baseline_commands(&self) -> Result<BTreeSet<String>, DiscoveryError> {
        let mut host = RedisHost::launch(&self.config, None)?;
        let mut conn = host.connect(&self.config)?;
        let names = list_commands(&mut conn)?
            .into_iter()
            .map(|command| command.command_name.to_ascii_lowercase())
            .collect::<BTreeSet<_>>();
        debug!(count = names.len(), "collected baseline commands");
        Ok(names)
    }
}

impl CommandDiscovery for RedisServerDiscovery {
    fn discover(
        &self,
        module_path: &Path,
        command_line_args: &str,
    ) -> Result<DiscoveredModule, DiscoveryError> {
        if !module_path.is_file() {
            return Err(DiscoveryError::ModuleNotFound(module_path.to_path_buf()));
        }

        let baseline = self.baseline_commands()?;

        let mut host = RedisHost::launch(&self.config, Some((module_path, command_line_args)))?;
        let mut conn = host.connect(&self.config)?;

        let (name, version) = loaded_module(&mut conn)?;
        let commands: Vec<CommandDescriptor> = list_commands(&mut conn)?
            .into_iter()
            .filter(|command| !baseline.contains(&command.command_name.to_ascii_lowercase()))
            .collect();

        info!(module = %name, version = %version, commands = commands.len(), "discovered module");
        Ok(DiscoveredModule {
            name,
            version,
            commands,
        })
    }
}

/// A running `redis-server`; killed and reaped when dropped.
///
/// Its stdout and stderr go to an unlinked temp file, so a chatty host never
/// blocks on a full pipe.
struct RedisHost {
    child: Child,
    port: u16,
    log: File,
}

impl RedisHost {
    fn launch(
        config: &DiscoveryConfig,
        module: Option<(&Path, &str)>,
    ) -> Result<Self, DiscoveryError> {
        let port = free_port(&config.host)?;

        let mut command = Command::new(&config.redis_server);
        command
            .arg("--port")
            .arg(port.to_string())
            .arg("--bind")
            .arg(&config.host)
            .arg("--save")
            .arg("")
            .arg("--appendonly")
            .arg("no");

        if let Some((module_path, args)) = module {
            command.arg("--loadmodule").arg(module_path);
            command.args(args.split_whitespace());
        }

        let log = tempfile::tempfile()?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?));

        debug!(?command, "launching redis host");
        let child = command.spawn().map_err(|source| DiscoveryError::Spawn {
            program: config.redis_server.display().to_string(),
            source,
        })?;

        Ok(Self { child, port, log })
    }

    fn connect(&mut self, config: &DiscoveryConfig) -> Result<Connection, DiscoveryError> {
        let started = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Err(DiscoveryError::HostExited {
                    status,
                    log: self.log_tail(),
                });
            }

            match TcpStream::connect((config.host.as_str(), self.port)) {
                Ok(stream) => return Connection::new(stream, config.io_timeout()),
                Err(err) if started.elapsed() >= config.startup_timeout() => {
                    debug!(error = %err, "giving up on redis host");
                    return Err(DiscoveryError::StartupTimeout {
                        port: self.port,
                        waited: started.elapsed(),
                    });
                }
                Err(_) => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    fn log_tail(&mut self) -> String {
        let mut bytes = Vec::new();
        if let Err(err) = self
            .log
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.log.read_to_end(&mut bytes))
        {
            debug!(error = %err, "failed to read redis host log");
            return String::new();
        }
        let log = String::from_utf8_lossy(&bytes);

        let lines: Vec<&str> = log.lines().filter(|line| !line.trim().is_empty()).collect();
        if lines.is_empty() {
            return String::new();
        }
        let tail = &lines[lines.len().saturating_sub(LOG_TAIL_LINES)..];
        format!("; host log:\n{}", tail.join("\n"))
    }
}

impl Drop for RedisHost {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            debug!(error = %err, "redis host already stopped");
        }
        if let Err(err) = self.child.wait() {
            warn!(error = %err, "failed to reap redis host");
        }
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    fn new(stream: TcpStream, timeout: Duration) -> Result<Self, DiscoveryError> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn call(&mut self, name: &'static str, args: &[&str]) -> Result<RespValue, DiscoveryError> {
        self.writer.write_all(&resp::encode_command(args))?;
        self.writer.flush()?;
        match resp::read_value(&mut self.reader)? {
            RespValue::Error(message) => Err(DiscoveryError::Server {
                command: name,
                message,
            }),
            reply => Ok(reply),
        }
    }
}

fn free_port(host: &str) -> Result<u16, DiscoveryError> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

fn loaded_module(conn: &mut Connection) -> Result<(String, ModuleVersion), DiscoveryError> {
    let reply = conn.call("MODULE LIST", &["MODULE", "LIST"])?;
    parse_module_list(reply)
}

fn list_commands(conn: &mut Connection) -> Result<Vec<CommandDescriptor>, DiscoveryError> {
    let reply = conn.call("COMMAND", &["COMMAND"])?;
    parse_command_table(reply)
}

fn parse_module_list(reply: RespValue) -> Result<(String, ModuleVersion), DiscoveryError> {
    let modules = reply
        .into_array()
        .ok_or_else(|| unexpected("MODULE LIST", "expected an array of modules"))?;
    let entry = modules
        .into_iter()
        .next()
        .ok_or(DiscoveryError::NoModuleLoaded)?
        .into_array()
        .ok_or_else(|| unexpected("MODULE LIST", "module entry is not an array"))?;

    let mut name = None;
    let mut version = None;
    for pair in entry.chunks(2) {
        let [key, value] = pair else {
            return Err(unexpected("MODULE LIST", "odd number of fields in module entry"));
        };
        match key.as_text().as_deref() {
            Some("name") => name = value.as_text(),
            Some("ver") => {
                version = match value {
                    RespValue::Integer(number) => Some(ModuleVersion::Number(*number)),
                    other => other.as_text().map(ModuleVersion::Text),
                }
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| unexpected("MODULE LIST", "module entry has no name"))?;
    let version = version.ok_or_else(|| unexpected("MODULE LIST", "module entry has no ver"))?;
    Ok((name, version))
}

fn parse_command_table(reply: RespValue) -> Result<Vec<CommandDescriptor>, DiscoveryError> {
    let entries = reply
        .into_array()
        .ok_or_else(|| unexpected("COMMAND", "expected an array of commands"))?;
    entries.into_iter().map(parse_command_entry).collect()
}

fn parse_command_entry(entry: RespValue) -> Result<CommandDescriptor, DiscoveryError> {
    let fields = entry
        .into_array()
        .ok_or_else(|| unexpected("COMMAND", "command entry is not an array"))?;
    if fields.len() < 6 {
        return Err(unexpected(
            "COMMAND",
            format!("command entry has {} fields, expected at least 6", fields.len()),
        ));
    }

    let integer = |index: usize, label: &str| {
        fields[index]
            .as_integer()
            .ok_or_else(|| unexpected("COMMAND", format!("{label} is not an integer")))
    };

    let command_name = fields[0]
        .as_text()
        .ok_or_else(|| unexpected("COMMAND", "command name is not a string"))?;
    let flags = match &fields[2] {
        RespValue::Array(Some(items)) => items.iter().filter_map(RespValue::as_text).collect(),
        _ => return Err(unexpected("COMMAND", format!("flags of {command_name} are not an array"))),
    };

    Ok(CommandDescriptor {
        command_arity: integer(1, "arity")?,
        command_name,
        first_key: integer(3, "first key")?,
        flags,
        last_key: integer(4, "last key")?,
        step: integer(5, "step")?,
    })
}

fn unexpected(command: &'static str, detail: impl Into<String>) -> DiscoveryError {
    DiscoveryError::UnexpectedReply {
        command,
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> RespValue {
        RespValue::Bulk(Some(text.as_bytes().to_vec()))
    }

    fn command_entry(name: &str, arity: i64, flags: &[&str]) -> RespValue {
        RespValue::Array(Some(vec![
            bulk(name),
            RespValue::Integer(arity),
            RespValue::Array(Some(
                flags
                    .iter()
                    .map(|flag| RespValue::Simple(flag.to_string()))
                    .collect(),
            )),
            RespValue::Integer(1),
            RespValue::Integer(1),
            RespValue::Integer(1),
        ]))
    }

    #[test]
    fn module_list_yields_name_and_numeric_version() {
        let reply = RespValue::Array(Some(vec![RespValue::Array(Some(vec![
            bulk("name"),
            bulk("foo"),
            bulk("ver"),
            RespValue::Integer(10203),
            bulk("path"),
            bulk("/tmp/foo.so"),
        ]))]));

        let (name, version) = parse_module_list(reply).expect("parses");
        assert_eq!(name, "foo");
        assert_eq!(version, ModuleVersion::Number(10203));
    }

    #[test]
    fn empty_module_list_is_an_error() {
        let err = parse_module_list(RespValue::Array(Some(Vec::new()))).expect_err("no module");
        assert!(matches!(err, DiscoveryError::NoModuleLoaded));
    }

    #[test]
    fn command_table_keeps_reply_order_and_flags() {
        let reply = RespValue::Array(Some(vec![
            command_entry("set.foo", -3, &["write", "denyoom"]),
            command_entry("get.foo", 2, &["readonly"]),
        ]));

        let commands = parse_command_table(reply).expect("parses");
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command_name, "set.foo");
        assert_eq!(commands[0].command_arity, -3);
        assert_eq!(commands[0].flags, vec!["write", "denyoom"]);
        assert_eq!(commands[1].command_name, "get.foo");
        assert_eq!(commands[1].step, 1);
    }

    #[test]
    fn short_command_entries_are_rejected() {
        let reply = RespValue::Array(Some(vec![RespValue::Array(Some(vec![bulk("x")]))]));
        let err = parse_command_table(reply).expect_err("too short");
        assert!(matches!(err, DiscoveryError::UnexpectedReply { command: "COMMAND", .. }));
    }

    #[test]
    fn missing_module_binary_fails_before_launching() {
        let discovery = RedisServerDiscovery::new(DiscoveryConfig {
            redis_server: "definitely-not-a-redis-server".into(),
            ..DiscoveryConfig::default()
        });
        let err = discovery
            .discover(Path::new("does/not/exist.so"), "")
            .expect_err("missing module");
        assert!(matches!(err, DiscoveryError::ModuleNotFound(_)));
    }

    #[cfg(unix)]
    fn fake_host(dir: &Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-redis-server");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        script
    }

    #[cfg(unix)]
    #[test]
    fn host_that_exits_reports_status_and_log_tail() {
        let temp = tempfile::tempdir().expect("temp dir");
        let module = temp.path().join("mymod.so");
        std::fs::write(&module, b"\x7fELF").expect("write module");

        let discovery = RedisServerDiscovery::new(DiscoveryConfig {
            redis_server: fake_host(temp.path(), "echo 'Module mymod.so failed to load' >&2\nexit 3"),
            startup_timeout_ms: 5_000,
            ..DiscoveryConfig::default()
        });
        let err = discovery.discover(&module, "").expect_err("host exits");
        match err {
            DiscoveryError::HostExited { status, log } => {
                assert_eq!(status.code(), Some(3));
                assert!(log.contains("failed to load"), "{log}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn noisy_host_that_exits_is_not_blocked_by_its_output() {
        let temp = tempfile::tempdir().expect("temp dir");
        let module = temp.path().join("mymod.so");
        std::fs::write(&module, b"\x7fELF").expect("write module");

        // Far more than a pipe buffer holds.
        let body = "i=0\nwhile [ $i -lt 4000 ]; do echo \"log line $i padded to be fairly long\"; i=$((i+1)); done\nexit 1";
        let discovery = RedisServerDiscovery::new(DiscoveryConfig {
            redis_server: fake_host(temp.path(), body),
            startup_timeout_ms: 20_000,
            ..DiscoveryConfig::default()
        });
        let err = discovery.discover(&module, "").expect_err("host exits");
        match err {
            DiscoveryError::HostExited { log, .. } => {
                assert!(log.contains("log line 3999"), "{log}");
                assert!(!log.contains("log line 3994 "), "{log}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn silent_host_times_out_and_is_reaped() {
        let temp = tempfile::tempdir().expect("temp dir");
        let module = temp.path().join("mymod.so");
        std::fs::write(&module, b"\x7fELF").expect("write module");
        let pid_file = temp.path().join("host.pid");

        let discovery = RedisServerDiscovery::new(DiscoveryConfig {
            redis_server: fake_host(
                temp.path(),
                &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
            ),
            startup_timeout_ms: 300,
            ..DiscoveryConfig::default()
        });
        let err = discovery.discover(&module, "").expect_err("never listens");
        assert!(matches!(err, DiscoveryError::StartupTimeout { .. }), "{err:?}");

        let pid = std::fs::read_to_string(&pid_file).expect("pid written");
        let proc_dir = Path::new("/proc").join(pid.trim());
        assert!(!proc_dir.exists(), "host {} still running", pid.trim());
    }

    #[test]
    fn missing_host_binary_is_a_spawn_error() {
        let temp = tempfile::tempdir().expect("temp dir");
        let module = temp.path().join("mymod.so");
        std::fs::write(&module, b"\x7fELF").expect("write module");

        let discovery = RedisServerDiscovery::new(DiscoveryConfig {
            redis_server: temp.path().join("no-such-redis-server"),
            ..DiscoveryConfig::default()
        });
        let err = discovery.discover(&module, "").expect_err("spawn fails");
        assert!(matches!(err, DiscoveryError::Spawn { .. }));
    }
}
