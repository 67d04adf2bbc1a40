use clap::{Parser, Subcommand};
use plug_common::{
    DeviceFailure, ErrorBody, Grant, GrantRequest, PlugInfo, PlugStatus, Role, ROLE_HEADER,
    USER_HEADER,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::process::{Command, Stdio};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the plugd daemon
    #[arg(long, env = "PLUGCTL_URL", default_value = "http://localhost:5005")]
    url: String,

    /// User id to act as
    #[arg(long, env = "PLUGCTL_USER")]
    user: String,

    /// Role to present to the daemon (admin or user)
    #[arg(long, env = "PLUGCTL_ROLE", value_parser = parse_role, default_value = "user")]
    role: Role,

    #[command(subcommand)]
    command: Commands,
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::parse(raw).ok_or_else(|| format!("unknown role '{}', expected admin or user", raw))
}

#[derive(Subcommand)]
enum Commands {
    /// List plugs visible to you
    List,
    /// Reserve a plug, switching it on if you are the first holder
    Reserve {
        plug: String,
    },
    /// Release your reservation, switching the plug off if you were the last holder
    Release {
        plug: String,
    },
    /// Show live state and holders of a plug
    Status {
        plug: String,
    },
    /// [admin] Drop every reservation on a plug and switch it off
    Clear {
        plug: String,
    },
    /// [admin] Allow a user to reserve a plug
    Grant {
        user_id: String,
        plug: String,
    },
    /// [admin] Withdraw a user's access to a plug
    Revoke {
        user_id: String,
        plug: String,
    },
    /// [admin] List all grants
    Grants,
    /// Reserve a plug, run a command, then release the plug
    Run {
        plug: String,

        /// Command and arguments to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

struct Api {
    client: Client,
    base: String,
    user: String,
    role: Role,
}

impl Api {
    fn get(&self, path: &str) -> RequestBuilder {
        self.authed(self.client.get(format!("{}{}", self.base, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authed(self.client.post(format!("{}{}", self.base, path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.authed(self.client.delete(format!("{}{}", self.base, path)))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(USER_HEADER, &self.user).header(ROLE_HEADER, self.role.as_str())
    }
}

fn power(on: Option<bool>) -> &'static str {
    match on {
        Some(true) => "on",
        Some(false) => "off",
        None => "unknown",
    }
}

fn print_status(status: &PlugStatus) {
    println!(
        "Plug: {}, Power: {}, Users: {} [{}]",
        status.plug_id,
        power(status.device_on),
        status.active_users,
        status.holders.join(", ")
    );
}

/// Print a failed response. Returns the plug status a 503 still carries.
async fn report_failure(resp: Response, action: &str) -> Option<PlugStatus> {
    let code = resp.status();
    if code == StatusCode::SERVICE_UNAVAILABLE {
        if let Ok(body) = resp.json::<DeviceFailure>().await {
            eprintln!("Warning: {} went through but the device did not respond: {}", action, body.error);
            return body.status;
        }
        eprintln!("Failed to {}: {}", action, code);
        return None;
    }
    match resp.json::<ErrorBody>().await {
        Ok(body) => eprintln!("Failed to {}: {} ({})", action, body.error, code),
        Err(_) => eprintln!("Failed to {}: {}", action, code),
    }
    None
}

async fn transition(req: RequestBuilder, action: &str) -> Result<bool, reqwest::Error> {
    let resp = req.send().await?;
    if resp.status().is_success() {
        let status: PlugStatus = resp.json().await?;
        print_status(&status);
        Ok(true)
    } else if let Some(status) = report_failure(resp, action).await {
        print_status(&status);
        Ok(true)
    } else {
        Ok(false)
    }
}

async fn expect_empty(req: RequestBuilder, action: &str, done: &str) -> Result<bool, reqwest::Error> {
    let resp = req.send().await?;
    if resp.status().is_success() {
        println!("{}", done);
        Ok(true)
    } else {
        report_failure(resp, action).await;
        Ok(false)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        base: cli.url.trim_end_matches('/').to_string(),
        user: cli.user,
        role: cli.role,
    };

    let ok = match cli.command {
        Commands::List => {
            let resp = api.get("/plugs").send().await?;
            if resp.status().is_success() {
                let plugs: Vec<PlugInfo> = resp.json().await?;
                println!("Plugs:");
                for plug in plugs {
                    println!(
                        "Plug: {}, Address: {}, Power: {}, Users: {} [{}]",
                        plug.plug_id,
                        plug.address,
                        power(plug.device_on),
                        plug.active_users,
                        plug.holders.join(", ")
                    );
                }
                true
            } else {
                report_failure(resp, "list plugs").await;
                false
            }
        }
        Commands::Reserve { plug } => {
            transition(api.post(&format!("/plugs/{}/reserve", plug)), "reserve plug").await?
        }
        Commands::Release { plug } => {
            transition(api.post(&format!("/plugs/{}/release", plug)), "release plug").await?
        }
        Commands::Status { plug } => {
            let resp = api.get(&format!("/plugs/{}/status", plug)).send().await?;
            if resp.status().is_success() {
                let status: PlugStatus = resp.json().await?;
                print_status(&status);
                true
            } else {
                report_failure(resp, "get status").await;
                false
            }
        }
        Commands::Clear { plug } => {
            let done = format!("Cleared all reservations on {}", plug);
            expect_empty(api.delete(&format!("/plugs/{}/reservations", plug)), "clear plug", &done).await?
        }
        Commands::Grant { user_id, plug } => {
            let done = format!("Granted {} access to {}", user_id, plug);
            let req = api.post("/grants").json(&GrantRequest { user_id, plug_id: plug });
            expect_empty(req, "grant access", &done).await?
        }
        Commands::Revoke { user_id, plug } => {
            let done = format!("Revoked {} access to {}", user_id, plug);
            let req = api.delete("/grants").json(&GrantRequest { user_id, plug_id: plug });
            expect_empty(req, "revoke access", &done).await?
        }
        Commands::Grants => {
            let resp = api.get("/grants").send().await?;
            if resp.status().is_success() {
                let grants: Vec<Grant> = resp.json().await?;
                println!("Grants:");
                for grant in grants {
                    println!("User: {}, Plug: {}, Since: {}", grant.user_id, grant.plug_id, grant.created_at);
                }
                true
            } else {
                report_failure(resp, "list grants").await;
                false
            }
        }
        Commands::Run { plug, command } => {
            if !transition(api.post(&format!("/plugs/{}/reserve", plug)), "reserve plug").await? {
                std::process::exit(1);
            }

            let cmd = &command[0];
            let args = &command[1..];
            println!("Running: {} {:?} with {} reserved", cmd, args, plug);

            let status = Command::new(cmd)
                .args(args)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status();

            // Release plug
            transition(api.post(&format!("/plugs/{}/release", plug)), "release plug").await?;

            // Exit with the command's exit code
            match status {
                Ok(s) => {
                    if !s.success() {
                        std::process::exit(s.code().unwrap_or(1));
                    }
                }
                Err(e) => {
                    eprintln!("Failed to run command: {}", e);
                    std::process::exit(1);
                }
            }
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
