//! A tool for the election coordinator to drive an election over the node's
//! HTTP proxy: create and open it, cast demo votes, close it, run the DKG
//! actions, and fetch the final result.

use anyhow::{bail, ensure, Context};
use clap::Parser;
use evoting_contract::types::{
    ciphervote_from_pairs, Ballot, BallotStatus, Configuration, Election, ElectionsMetadata,
    Question, QuestionSelection,
};
use rand::rngs::OsRng;

/// Command line configuration of the application.
#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
struct Args {
    /// The node's HTTP proxy endpoint.
    #[arg(
        long = "proxy",
        default_value = "http://localhost:8080",
        env = "EVOTING_PROXY",
        global = true
    )]
    proxy: url::Url,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Create a new election and print its id.
    Create {
        /// Title of the election.
        #[arg(long = "title")]
        title: String,
        /// The user id of the election admin.
        #[arg(long = "admin")]
        admin: String,
        /// Question specs of the form `id:title:max_choices:choice1|choice2`.
        #[arg(long = "question", required = true)]
        questions: Vec<String>,
    },
    /// List all known elections.
    List,
    /// Print an election record.
    Status {
        election_id: String,
    },
    /// Initialize and set up the DKG actor, then open the election.
    Open {
        election_id: String,
    },
    /// Encrypt and cast a ballot.
    Cast {
        election_id: String,
        /// The voter's user id.
        #[arg(long = "user")]
        user: String,
        /// Per-question picks of the form `id=0,1,0`.
        #[arg(long = "pick", required = true)]
        picks: Vec<String>,
    },
    /// Close the election; the trustees start mixing.
    Close {
        election_id: String,
        #[arg(long = "admin")]
        admin: String,
    },
    /// Drive the public-share submissions once the mix is done.
    ComputePubshares {
        election_id: String,
    },
    /// Decrypt the shuffled ballots.
    Decrypt {
        election_id: String,
        #[arg(long = "admin")]
        admin: String,
    },
    /// Print the decrypted ballots.
    Result {
        election_id: String,
    },
}

struct Client {
    http: reqwest::Client,
    proxy: url::Url,
}

impl Client {
    fn new(proxy: url::Url) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to construct http client")?;
        Ok(Self { http, proxy })
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<url::Url> {
        self.proxy
            .join(path)
            .with_context(|| format!("Invalid endpoint path {path}"))
    }

    async fn get_election(&self, election_id: &str) -> anyhow::Result<Election> {
        let url = self.endpoint(&format!("/evoting/elections/{election_id}"))?;
        let response = self.http.get(url).send().await?;
        ensure!(
            response.status().is_success(),
            "Failed to get election {election_id}: {}",
            response.text().await?
        );
        Ok(response.json().await?)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self.http.post(self.endpoint(path)?).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("{path} failed ({status}): {}", response.text().await?);
        }
        Ok(response)
    }

    async fn put_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self.http.put(self.endpoint(path)?).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("{path} failed ({status}): {}", response.text().await?);
        }
        Ok(response)
    }
}

/// Parses `id:title:max_choices:choice1|choice2` into a [`Question`].
fn parse_question(spec: &str) -> anyhow::Result<Question> {
    let parts: Vec<&str> = spec.splitn(4, ':').collect();
    let [id, title, max_choices, choices] = parts[..] else {
        bail!("Question spec {spec:?} is not of the form id:title:max:choices");
    };
    Ok(Question {
        id: id.to_string(),
        title: title.to_string(),
        max_choices: max_choices
            .parse()
            .with_context(|| format!("Invalid max_choices in {spec:?}"))?,
        choices: choices.split('|').map(str::to_string).collect(),
    })
}

/// Parses `id=0,1,0` pick specs into ballot selections for the schema.
fn parse_ballot(picks: &[String], configuration: &Configuration) -> anyhow::Result<Ballot> {
    let mut selections = Vec::with_capacity(configuration.questions.len());
    for question in &configuration.questions {
        let spec = picks
            .iter()
            .find_map(|pick| pick.strip_prefix(&format!("{}=", question.id)))
            .with_context(|| format!("No picks given for question {}", question.id))?;
        let picks = spec
            .split(',')
            .map(|marker| match marker {
                "0" => Ok(false),
                "1" => Ok(true),
                other => bail!("Invalid pick marker {other:?}"),
            })
            .collect::<anyhow::Result<Vec<bool>>>()?;
        ensure!(
            picks.len() == question.choices.len(),
            "Question {} has {} choices, {} picks given",
            question.id,
            question.choices.len(),
            picks.len()
        );
        selections.push(QuestionSelection {
            question_id: question.id.clone(),
            picks,
        });
    }
    Ok(Ballot { selections })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = Client::new(args.proxy)?;

    match args.command {
        Command::Create {
            title,
            admin,
            questions,
        } => {
            let configuration = Configuration {
                main_title: title,
                questions: questions
                    .iter()
                    .map(|spec| parse_question(spec))
                    .collect::<anyhow::Result<Vec<Question>>>()?,
            };
            let response = client
                .post_json(
                    "/evoting/elections",
                    &serde_json::json!({
                        "configuration": configuration,
                        "adminId": admin,
                    }),
                )
                .await?;
            let body: serde_json::Value = response.json().await?;
            let election_id = body["electionId"]
                .as_str()
                .context("Proxy did not return an election id")?;
            println!("{election_id}");
        }
        Command::List => {
            let url = client.endpoint("/evoting/elections")?;
            let metadata: ElectionsMetadata = client.http.get(url).send().await?.json().await?;
            for election_id in metadata.elections_ids {
                println!("{election_id}");
            }
        }
        Command::Status { election_id } => {
            let election = client.get_election(&election_id).await?;
            println!("{}", serde_json::to_string_pretty(&election)?);
        }
        Command::Open { election_id } => {
            client
                .post_json(
                    "/evoting/services/dkg/actors",
                    &serde_json::json!({ "electionId": election_id }),
                )
                .await?;
            client
                .put_json(
                    &format!("/evoting/services/dkg/actors/{election_id}"),
                    &serde_json::json!({ "action": "setup" }),
                )
                .await?;
            client
                .put_json(
                    &format!("/evoting/elections/{election_id}"),
                    &serde_json::json!({ "action": "open" }),
                )
                .await?;
            println!("Election {election_id} is open");
        }
        Command::Cast {
            election_id,
            user,
            picks,
        } => {
            let election = client.get_election(&election_id).await?;
            let ballot = parse_ballot(&picks, &election.configuration)?;
            let public_key = election
                .public_key_point()
                .ok()
                .flatten()
                .context("The election has no public key yet")?;
            let pairs = election_common::elgamal::encrypt(
                &public_key,
                ballot.marshal().as_bytes(),
                &mut OsRng,
            )
            .context("Failed to encrypt the ballot")?;
            client
                .post_json(
                    &format!("/evoting/elections/{election_id}/vote"),
                    &serde_json::json!({
                        "userId": user,
                        "ballot": ciphervote_from_pairs(&pairs),
                    }),
                )
                .await?;
            println!("Ballot cast for {user}");
        }
        Command::Close { election_id, admin } => {
            client
                .put_json(
                    &format!("/evoting/elections/{election_id}"),
                    &serde_json::json!({ "action": "close", "userId": admin }),
                )
                .await?;
            println!("Election {election_id} is closed, trustees are mixing");
        }
        Command::ComputePubshares { election_id } => {
            client
                .put_json(
                    &format!("/evoting/services/dkg/actors/{election_id}"),
                    &serde_json::json!({ "action": "computePubshares" }),
                )
                .await?;
            println!("Public shares submitted");
        }
        Command::Decrypt { election_id, admin } => {
            client
                .put_json(
                    &format!("/evoting/elections/{election_id}"),
                    &serde_json::json!({ "action": "decrypt", "userId": admin }),
                )
                .await?;
            println!("Result available");
        }
        Command::Result { election_id } => {
            let election = client.get_election(&election_id).await?;
            for (position, entry) in election.decrypted_ballots.iter().enumerate() {
                match entry.status {
                    BallotStatus::Valid => println!("{position}: {:?}", entry.ballot),
                    BallotStatus::Invalid => println!("{position}: <invalid ballot>"),
                }
            }
        }
    }

    Ok(())
}
