//! Endpoint → field policy table.
//!
//! Exact paths are checked first, then wildcard patterns in table order.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Every JSON field name the default table knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Email,
    Password,
    Name,
    ContactAddress,
    Id,
    UserId,
    FullName,
    Balance,
    AccountId,
    Amount,
    Description,
    FromAccountId,
    ToAccountNumber,
    DestinationAccountNumber,
    Message,
    Error,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Email => "email",
            Field::Password => "password",
            Field::Name => "name",
            Field::ContactAddress => "contactAddress",
            Field::Id => "id",
            Field::UserId => "userId",
            Field::FullName => "fullName",
            Field::Balance => "balance",
            Field::AccountId => "accountId",
            Field::Amount => "amount",
            Field::Description => "description",
            Field::FromAccountId => "fromAccountId",
            Field::ToAccountNumber => "toAccountNumber",
            Field::DestinationAccountNumber => "destinationAccountNumber",
            Field::Message => "message",
            Field::Error => "error",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SIGN_IN_FIELDS: &[Field] = &[Field::Email, Field::Password];
const SIGN_UP_FIELDS: &[Field] = &[Field::Name, Field::Email, Field::Password];
const PROFILE_UPDATE_FIELDS: &[Field] = &[Field::Name, Field::ContactAddress];
const USER_RESPONSE_FIELDS: &[Field] = &[Field::UserId, Field::Name, Field::Email, Field::Id];
const CREATE_ACCOUNT_FIELDS: &[Field] = &[Field::FullName, Field::Email];
const ACCOUNT_RESPONSE_FIELDS: &[Field] = &[
    Field::Id,
    Field::FullName,
    Field::Email,
    Field::Balance,
    Field::UserId,
];
const DEPOSIT_FIELDS: &[Field] = &[Field::AccountId, Field::Amount, Field::Description];
const WITHDRAW_FIELDS: &[Field] = &[Field::AccountId, Field::Amount, Field::Description];
const TRANSFER_FIELDS: &[Field] = &[
    Field::FromAccountId,
    Field::ToAccountNumber,
    Field::Amount,
    Field::Description,
];
const TRANSACTION_RESPONSE_FIELDS: &[Field] = &[
    Field::Id,
    Field::AccountId,
    Field::Amount,
    Field::Description,
    Field::DestinationAccountNumber,
];

/// Fields decrypted from error bodies on policy-covered paths.
pub const ERROR_FIELDS: &[Field] = &[Field::Message, Field::Error];

/// Logical API operations that carry an encryption policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SignIn,
    SignUp,
    GoogleSignIn,
    Refresh,
    CurrentUser,
    ProfileUpdate,
    Accounts,
    AccountLookup,
    Deposit,
    Withdrawal,
    Transfer,
    TransactionHistory,
    TransactionLookup,
}

impl Operation {
    /// Table order; wildcard entries are tried in this order.
    pub const ALL: [Operation; 13] = [
        Operation::SignIn,
        Operation::SignUp,
        Operation::GoogleSignIn,
        Operation::Refresh,
        Operation::CurrentUser,
        Operation::ProfileUpdate,
        Operation::Accounts,
        Operation::AccountLookup,
        Operation::Deposit,
        Operation::Withdrawal,
        Operation::Transfer,
        Operation::TransactionHistory,
        Operation::TransactionLookup,
    ];

    pub fn pattern(&self) -> &'static str {
        match self {
            Operation::SignIn => "/api/auth/login",
            Operation::SignUp => "/api/auth/signup",
            Operation::GoogleSignIn => "/api/auth/oauth2/google",
            Operation::Refresh => "/api/auth/refresh",
            Operation::CurrentUser => "/api/auth/user/me",
            Operation::ProfileUpdate => "/api/auth/user/update",
            Operation::Accounts => "/api/accounts",
            Operation::AccountLookup => "/api/accounts/*",
            Operation::Deposit => "/api/transactions/deposit",
            Operation::Withdrawal => "/api/transactions/withdraw",
            Operation::Transfer => "/api/transactions/transfer",
            Operation::TransactionHistory => "/api/transactions/history/*",
            Operation::TransactionLookup => "/api/transactions/*",
        }
    }

    pub fn request_fields(&self) -> &'static [Field] {
        match self {
            Operation::SignIn => SIGN_IN_FIELDS,
            Operation::SignUp => SIGN_UP_FIELDS,
            Operation::ProfileUpdate => PROFILE_UPDATE_FIELDS,
            Operation::Accounts => CREATE_ACCOUNT_FIELDS,
            Operation::Deposit => DEPOSIT_FIELDS,
            Operation::Withdrawal => WITHDRAW_FIELDS,
            Operation::Transfer => TRANSFER_FIELDS,
            Operation::GoogleSignIn
            | Operation::Refresh
            | Operation::CurrentUser
            | Operation::AccountLookup
            | Operation::TransactionHistory
            | Operation::TransactionLookup => &[],
        }
    }

    pub fn response_fields(&self) -> &'static [Field] {
        match self {
            Operation::SignUp => &[],
            Operation::SignIn
            | Operation::GoogleSignIn
            | Operation::Refresh
            | Operation::CurrentUser
            | Operation::ProfileUpdate => USER_RESPONSE_FIELDS,
            Operation::Accounts | Operation::AccountLookup => ACCOUNT_RESPONSE_FIELDS,
            Operation::Deposit
            | Operation::Withdrawal
            | Operation::Transfer
            | Operation::TransactionHistory
            | Operation::TransactionLookup => TRANSACTION_RESPONSE_FIELDS,
        }
    }
}

/// How wildcard patterns are compared against a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Anchored regex only: `*` stands for any run of characters.
    #[default]
    Anchored,
    /// Anchored regex, or the pattern text appearing anywhere in the path.
    /// Kept for deployments that relied on the legacy substring behaviour.
    Lenient,
}

impl FromStr for MatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anchored" => Ok(MatchMode::Anchored),
            "lenient" => Ok(MatchMode::Lenient),
            other => Err(anyhow!("unknown policy match mode: {other}")),
        }
    }
}

/// Field sets applied to one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionPolicy {
    pub request_fields: BTreeSet<String>,
    pub response_fields: BTreeSet<String>,
}

impl EncryptionPolicy {
    pub fn new<I, J, S, T>(request_fields: I, response_fields: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            request_fields: request_fields.into_iter().map(Into::into).collect(),
            response_fields: response_fields.into_iter().map(Into::into).collect(),
        }
    }

    fn from_operation(op: Operation) -> Self {
        Self::new(
            op.request_fields().iter().map(Field::as_str),
            op.response_fields().iter().map(Field::as_str),
        )
    }
}

/// Policy entry as written in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEntry {
    pub pattern: String,
    #[serde(default)]
    pub request_fields: Vec<String>,
    #[serde(default)]
    pub response_fields: Vec<String>,
}

#[derive(Debug, Clone)]
struct WildcardEntry {
    pattern: String,
    regex: Regex,
    policy: EncryptionPolicy,
}

/// Immutable endpoint policy table.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    mode: MatchMode,
    exact: HashMap<String, EncryptionPolicy>,
    // Table order, exact entries included, for lenient substring checks.
    ordered: Vec<WildcardEntry>,
}

impl PolicyTable {
    pub fn builder() -> PolicyTableBuilder {
        PolicyTableBuilder::default()
    }

    /// Table covering every [`Operation`].
    pub fn defaults() -> Self {
        Operation::ALL
            .iter()
            .fold(Self::builder(), |b, op| {
                b.policy(op.pattern(), EncryptionPolicy::from_operation(*op))
            })
            .build()
            .expect("static policy patterns compile")
    }

    pub fn from_entries(entries: &[PolicyEntry], mode: MatchMode) -> Result<Self> {
        entries
            .iter()
            .fold(Self::builder().match_mode(mode), |b, e| {
                b.entry(&e.pattern, e.request_fields.clone(), e.response_fields.clone())
            })
            .build()
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn match_mode(&self) -> MatchMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Look up the policy governing `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&EncryptionPolicy> {
        if let Some(policy) = self.exact.get(path) {
            return Some(policy);
        }

        self.ordered
            .iter()
            .find(|entry| match self.mode {
                MatchMode::Anchored => entry.pattern.contains('*') && entry.regex.is_match(path),
                MatchMode::Lenient => {
                    path.contains(entry.pattern.as_str()) || entry.regex.is_match(path)
                }
            })
            .map(|entry| &entry.policy)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug, Default)]
pub struct PolicyTableBuilder {
    mode: MatchMode,
    entries: Vec<(String, EncryptionPolicy)>,
}

impl PolicyTableBuilder {
    pub fn match_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn policy(mut self, pattern: &str, policy: EncryptionPolicy) -> Self {
        self.entries.push((pattern.to_string(), policy));
        self
    }

    pub fn entry<I, J, S, T>(self, pattern: &str, request_fields: I, response_fields: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.policy(pattern, EncryptionPolicy::new(request_fields, response_fields))
    }

    pub fn build(self) -> Result<PolicyTable> {
        let mut exact = HashMap::new();
        let mut ordered = Vec::with_capacity(self.entries.len());
        for (pattern, policy) in self.entries {
            let regex = wildcard_regex(&pattern)
                .with_context(|| format!("compiling endpoint pattern {pattern}"))?;
            if !pattern.contains('*') {
                // First entry wins for duplicate exact paths.
                exact.entry(pattern.clone()).or_insert_with(|| policy.clone());
            }
            ordered.push(WildcardEntry {
                pattern,
                regex,
                policy,
            });
        }
        Ok(PolicyTable {
            mode: self.mode,
            exact,
            ordered,
        })
    }
}

fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Ok(Regex::new(&format!("^{body}$"))?)
}
