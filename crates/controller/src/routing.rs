//! Backend routing rules
//!
//! A rule sends a message to a backend partner when its match clause holds.
//! Match clauses are prefix expressions over message attributes:
//!
//! ```text
//! &(equals(Action, 'Form_A'), not(startswith(ServiceName, 'Test')))
//! ```
//!
//! `&` and `|` take two operands, `not` one, `equals` and `startswith`
//! compare an attribute with a quoted value.

use serde::{Deserialize, Serialize};
use shared::{ConfigError, LinkPartnerName, Message, MessageDetails};
use std::fmt;

/// Message attribute a routing expression can test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingAttribute {
    ServiceName,
    ServiceType,
    Action,
    FromPartyId,
    FromPartyIdType,
    FromPartyRole,
    ToPartyId,
    ToPartyIdType,
    ToPartyRole,
    FinalRecipient,
    OriginalSender,
}

impl RoutingAttribute {
    const ALL: [RoutingAttribute; 11] = [
        RoutingAttribute::ServiceName,
        RoutingAttribute::ServiceType,
        RoutingAttribute::Action,
        RoutingAttribute::FromPartyId,
        RoutingAttribute::FromPartyIdType,
        RoutingAttribute::FromPartyRole,
        RoutingAttribute::ToPartyId,
        RoutingAttribute::ToPartyIdType,
        RoutingAttribute::ToPartyRole,
        RoutingAttribute::FinalRecipient,
        RoutingAttribute::OriginalSender,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RoutingAttribute::ServiceName => "ServiceName",
            RoutingAttribute::ServiceType => "ServiceType",
            RoutingAttribute::Action => "Action",
            RoutingAttribute::FromPartyId => "FromPartyId",
            RoutingAttribute::FromPartyIdType => "FromPartyIdType",
            RoutingAttribute::FromPartyRole => "FromPartyRole",
            RoutingAttribute::ToPartyId => "ToPartyId",
            RoutingAttribute::ToPartyIdType => "ToPartyIdType",
            RoutingAttribute::ToPartyRole => "ToPartyRole",
            RoutingAttribute::FinalRecipient => "FinalRecipient",
            RoutingAttribute::OriginalSender => "OriginalSender",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Value of this attribute in `details`, if set
    pub fn value(self, details: &MessageDetails) -> Option<&str> {
        match self {
            RoutingAttribute::ServiceName => details.service.as_deref(),
            RoutingAttribute::ServiceType => details.service_type.as_deref(),
            RoutingAttribute::Action => details.action.as_deref(),
            RoutingAttribute::FromPartyId => Some(details.from_party.party_id.as_str()),
            RoutingAttribute::FromPartyIdType => details.from_party.party_id_type.as_deref(),
            RoutingAttribute::FromPartyRole => details.from_party.role.as_deref(),
            RoutingAttribute::ToPartyId => Some(details.to_party.party_id.as_str()),
            RoutingAttribute::ToPartyIdType => details.to_party.party_id_type.as_deref(),
            RoutingAttribute::ToPartyRole => details.to_party.role.as_deref(),
            RoutingAttribute::FinalRecipient => details.final_recipient.as_deref(),
            RoutingAttribute::OriginalSender => details.original_sender.as_deref(),
        }
    }
}

impl fmt::Display for RoutingAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed match clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoutingExpression {
    Equals(RoutingAttribute, String),
    StartsWith(RoutingAttribute, String),
    And(Box<RoutingExpression>, Box<RoutingExpression>),
    Or(Box<RoutingExpression>, Box<RoutingExpression>),
    Not(Box<RoutingExpression>),
}

impl RoutingExpression {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let mut parser = Parser { source, pos: 0 };
        parser.skip_whitespace();
        if parser.at_end() {
            return Err(parser.error("expression is empty"));
        }
        let expression = parser.expression()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(parser.error("unexpected input after the expression"));
        }
        Ok(expression)
    }

    pub fn matches(&self, details: &MessageDetails) -> bool {
        match self {
            RoutingExpression::Equals(attribute, value) => attribute.value(details) == Some(value.as_str()),
            RoutingExpression::StartsWith(attribute, value) => {
                attribute.value(details).is_some_and(|v| v.starts_with(value.as_str()))
            }
            RoutingExpression::And(left, right) => left.matches(details) && right.matches(details),
            RoutingExpression::Or(left, right) => left.matches(details) || right.matches(details),
            RoutingExpression::Not(inner) => !inner.matches(details),
        }
    }
}

impl fmt::Display for RoutingExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingExpression::Equals(attribute, value) => write!(f, "equals({}, '{}')", attribute, value),
            RoutingExpression::StartsWith(attribute, value) => write!(f, "startswith({}, '{}')", attribute, value),
            RoutingExpression::And(left, right) => write!(f, "&({}, {})", left, right),
            RoutingExpression::Or(left, right) => write!(f, "|({}, {})", left, right),
            RoutingExpression::Not(inner) => write!(f, "not({})", inner),
        }
    }
}

impl TryFrom<String> for RoutingExpression {
    type Error = ConfigError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Self::parse(&source)
    }
}

impl From<RoutingExpression> for String {
    fn from(expression: RoutingExpression) -> Self {
        expression.to_string()
    }
}

struct Parser<'a> {
    source: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidRoutingExpression {
            expression: self.source.to_string(),
            column: self.source[..self.pos].chars().count() + 1,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ConfigError> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}' but found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}' but the expression ended", expected))),
        }
    }

    fn word(&mut self) -> &str {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
            self.pos += c.len_utf8();
        }
        &self.source[start..self.pos]
    }

    fn expression(&mut self) -> Result<RoutingExpression, ConfigError> {
        self.skip_whitespace();
        match self.peek() {
            Some('&') => {
                self.pos += 1;
                let (left, right) = self.operands()?;
                Ok(RoutingExpression::And(Box::new(left), Box::new(right)))
            }
            Some('|') => {
                self.pos += 1;
                let (left, right) = self.operands()?;
                Ok(RoutingExpression::Or(Box::new(left), Box::new(right)))
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                let operator = self.word().to_ascii_lowercase();
                match operator.as_str() {
                    "not" => {
                        self.expect('(')?;
                        let inner = self.expression()?;
                        self.expect(')')?;
                        Ok(RoutingExpression::Not(Box::new(inner)))
                    }
                    "equals" | "startswith" => {
                        self.expect('(')?;
                        let attribute = self.attribute()?;
                        self.expect(',')?;
                        let value = self.value()?;
                        self.expect(')')?;
                        Ok(if operator == "equals" {
                            RoutingExpression::Equals(attribute, value)
                        } else {
                            RoutingExpression::StartsWith(attribute, value)
                        })
                    }
                    _ => {
                        self.pos = start;
                        Err(self.error(format!("unknown operator '{}'", operator)))
                    }
                }
            }
            Some(c) => Err(self.error(format!("expected an operator but found '{}'", c))),
            None => Err(self.error("expected an operator but the expression ended")),
        }
    }

    fn operands(&mut self) -> Result<(RoutingExpression, RoutingExpression), ConfigError> {
        self.expect('(')?;
        let left = self.expression()?;
        self.expect(',')?;
        let right = self.expression()?;
        self.expect(')')?;
        Ok((left, right))
    }

    fn attribute(&mut self) -> Result<RoutingAttribute, ConfigError> {
        self.skip_whitespace();
        let start = self.pos;
        let name = self.word().to_string();
        match RoutingAttribute::from_name(&name) {
            Some(attribute) => Ok(attribute),
            None => {
                self.pos = start;
                Err(self.error(format!("unknown attribute '{}'", name)))
            }
        }
    }

    fn value(&mut self) -> Result<String, ConfigError> {
        self.expect('\'')?;
        let rest = &self.source[self.pos..];
        match rest.find('\'') {
            Some(end) => {
                let value = rest[..end].to_string();
                self.pos += end + 1;
                Ok(value)
            }
            None => Err(self.error("value is not closed by '")),
        }
    }
}

fn default_priority() -> i32 {
    0
}

/// Rule sending matching messages to a backend partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub id: String,

    pub link_name: LinkPartnerName,

    /// Higher priorities are evaluated first
    #[serde(default = "default_priority")]
    pub priority: i32,

    pub match_clause: RoutingExpression,
}

impl RoutingRule {
    pub fn new(id: impl Into<String>, link_name: impl Into<LinkPartnerName>, match_clause: RoutingExpression) -> Self {
        Self {
            id: id.into(),
            link_name: link_name.into(),
            priority: default_priority(),
            match_clause,
        }
    }

    /// Builder: set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.match_clause.matches(&message.details)
    }
}

/// Order rules by descending priority, ties by id
pub fn sort_rules(rules: &mut [RoutingRule]) {
    rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
}

/// First rule of the sorted `rules` matching `message`
pub fn first_match<'a>(rules: &'a [RoutingRule], message: &Message) -> Option<&'a RoutingRule> {
    rules.iter().find(|rule| rule.matches(message))
}
