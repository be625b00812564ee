//! Instruction prompt sent with every page image.
//!
//! Keeping the prompt here (rather than inline in the extraction client) makes
//! it the single place to change the target schema, and lets tests assert on
//! the rules without a live service.
//!
//! Callers can override the default via
//! [`crate::config::PipelineConfig::extraction_prompt`].

/// Default instruction for extracting patient data from an intake form image.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are a medical document parser. You are looking at a scanned
medical intake form that was filled out by hand (or typed).

Extract ALL patient information you can find and return it as a JSON object.

Use this structure (include only fields that are actually present on the form):

{
  "first_name": "",
  "last_name": "",
  "date_of_birth": "",
  "gender": "",
  "phone": "",
  "email": "",
  "address": "",
  "emergency_contact_name": "",
  "emergency_contact_phone": "",
  "insurance_provider": "",
  "insurance_id": "",
  "allergies": [],
  "current_medications": [],
  "medical_conditions": [],
  "reason_for_visit": "",
  "additional_notes": ""
}

Rules:
- Return ONLY the JSON object, no other text.
- If a field is empty or unreadable, omit it from the JSON.
- For lists (allergies, medications, conditions), return an array of strings.
- Normalize dates to YYYY-MM-DD format when possible.
- Do your best with messy handwriting; make reasonable guesses rather than refusing."#;
