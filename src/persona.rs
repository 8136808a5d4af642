//! Per-session persona: which business the concierge speaks for and what it
//! handles on the call.
//!
//! The system instruction is built from an [`Industry`] and an
//! [`AssistantFunction`] unless the configuration sets one explicitly.

use crate::defaults;
use crate::error::ConciergeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercase and drop separators so `Real Estate`, `real-estate` and
/// `real_estate` all compare equal.
fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn unknown(key: &str, value: &str, options: &[&str]) -> ConciergeError {
    ConciergeError::ConfigInvalidValue {
        key: key.to_string(),
        message: format!("unknown value '{}', expected one of: {}", value, options.join(", ")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Industry {
    Healthcare,
    Legal,
    #[serde(rename = "Real Estate")]
    RealEstate,
    #[serde(rename = "Home Services")]
    HomeServices,
    Automotive,
    #[serde(rename = "E-commerce")]
    Ecommerce,
    Agencies,
    Enterprise,
}

impl Industry {
    pub const ALL: [Industry; 8] = [
        Industry::Healthcare,
        Industry::Legal,
        Industry::RealEstate,
        Industry::HomeServices,
        Industry::Automotive,
        Industry::Ecommerce,
        Industry::Agencies,
        Industry::Enterprise,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Industry::Healthcare => "Healthcare",
            Industry::Legal => "Legal",
            Industry::RealEstate => "Real Estate",
            Industry::HomeServices => "Home Services",
            Industry::Automotive => "Automotive",
            Industry::Ecommerce => "E-commerce",
            Industry::Agencies => "Agencies",
            Industry::Enterprise => "Enterprise",
        }
    }

    /// Who typically calls and what the concierge must keep in mind.
    fn context(self) -> &'static str {
        match self {
            Industry::Healthcare => {
                "Callers are patients. Never give medical advice and never repeat \
                 health details back beyond what is needed to help."
            }
            Industry::Legal => {
                "Callers are prospective or current clients of a law firm. Do not give \
                 legal advice; gather the facts an attorney needs."
            }
            Industry::RealEstate => {
                "Callers are buyers, sellers and renters asking about listings, \
                 viewings and valuations."
            }
            Industry::HomeServices => {
                "Callers need work done at home, often urgently. Capture the address, \
                 the problem and how soon they need someone."
            }
            Industry::Automotive => {
                "Callers ask about vehicles, test drives, servicing and repairs."
            }
            Industry::Ecommerce => {
                "Callers are online shoppers asking about orders, deliveries, returns \
                 and products."
            }
            Industry::Agencies => {
                "Callers are prospective clients of a services agency asking about \
                 scope, pricing and availability."
            }
            Industry::Enterprise => {
                "Callers may be customers, partners or staff. Identify who they are \
                 and route them to the right team."
            }
        }
    }
}

impl fmt::Display for Industry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Industry {
    type Err = ConciergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Industry::ALL
            .into_iter()
            .find(|industry| normalize(industry.label()) == wanted)
            .ok_or_else(|| {
                let options: Vec<&str> = Industry::ALL.iter().map(|i| i.label()).collect();
                unknown("model.industry", s, &options)
            })
    }
}

/// What the concierge handles on the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssistantFunction {
    Appointments,
    Sales,
    Support,
    LeadQual,
    Other,
}

impl AssistantFunction {
    pub const ALL: [AssistantFunction; 5] = [
        AssistantFunction::Appointments,
        AssistantFunction::Sales,
        AssistantFunction::Support,
        AssistantFunction::LeadQual,
        AssistantFunction::Other,
    ];

    /// Short key as written in config files and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            AssistantFunction::Appointments => "Appointments",
            AssistantFunction::Sales => "Sales",
            AssistantFunction::Support => "Support",
            AssistantFunction::LeadQual => "LeadQual",
            AssistantFunction::Other => "Other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AssistantFunction::Appointments => "Appointment Booking",
            AssistantFunction::Sales => "Sales & Inquiries",
            AssistantFunction::Support => "Customer Support",
            AssistantFunction::LeadQual => "Lead Qualification",
            AssistantFunction::Other => "Custom Workflow",
        }
    }

    fn duty(self) -> &'static str {
        match self {
            AssistantFunction::Appointments => {
                "Book, move or cancel appointments. Confirm the date, time and the \
                 caller's name and phone number before you finish."
            }
            AssistantFunction::Sales => {
                "Answer questions about products and services and guide interested \
                 callers toward a purchase or a follow-up."
            }
            AssistantFunction::Support => {
                "Resolve the caller's problem, or collect enough detail for the team \
                 to follow up."
            }
            AssistantFunction::LeadQual => {
                "Find out what the caller needs, their budget and their timeline, and \
                 whether they are a good fit."
            }
            AssistantFunction::Other => {
                "Find out what the caller needs and help them with it."
            }
        }
    }
}

impl fmt::Display for AssistantFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for AssistantFunction {
    type Err = ConciergeError;

    /// Accepts the short key (`LeadQual`) or the label (`Lead Qualification`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        AssistantFunction::ALL
            .into_iter()
            .find(|f| normalize(f.key()) == wanted || normalize(f.label()) == wanted)
            .ok_or_else(|| {
                let options: Vec<&str> = AssistantFunction::ALL.iter().map(|f| f.key()).collect();
                unknown("model.function", s, &options)
            })
    }
}

/// Build the system instruction for a session.
///
/// With neither value set this is the generic concierge persona.
pub fn system_instruction(
    industry: Option<Industry>,
    function: Option<AssistantFunction>,
) -> String {
    if industry.is_none() && function.is_none() {
        return defaults::SYSTEM_INSTRUCTION.to_string();
    }

    let mut text = match industry {
        Some(industry) => format!(
            "You are a friendly voice concierge for a business in {}. {} ",
            industry.label(),
            industry.context()
        ),
        None => "You are a friendly voice concierge for a small business. ".to_string(),
    };
    text.push_str("Greet the caller and find out what they need. ");
    if let Some(function) = function {
        text.push_str(function.duty());
        text.push(' ');
    }
    text.push_str("Keep every reply short and conversational.");
    text
}
