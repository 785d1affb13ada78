use chrono::NaiveDate;

/// Slot spotting for one chat message. Dates and times come back verbatim;
/// normalization happens on our side against a known reference date.
pub fn build_booking_prompt(message: &str, today: NaiveDate) -> String {
    format!(
        r#"Extract interview booking details from the message below.

INSTRUCTIONS:
1. Find the person's full name and email address if they are stated
2. Copy any date and time expressions EXACTLY as written (e.g. "next Monday", "2 PM")
3. Do NOT convert, complete or guess dates and times
4. Use null for anything not stated in the message
5. Output ONLY valid JSON, nothing else

SCHEMA:
{{"name": "string or null", "email": "string or null", "date": "string or null", "time": "string or null"}}

Today is {}.

MESSAGE:
{}

JSON OUTPUT:"#,
        today.format("%A %Y-%m-%d"),
        message
    )
}

/// Interview requests written inside an uploaded document
pub fn build_document_bookings_prompt(text: &str) -> String {
    format!(
        r#"Analyze the following document and list every interview booking request it contains.

INSTRUCTIONS:
1. Each entry needs the requester's name, email, date and time
2. Copy date and time expressions exactly as written in the document
3. If the document contains no interview requests, return []
4. Output ONLY a JSON array, no markdown, no explanations

SCHEMA:
[
  {{"name": "John Doe", "email": "john@example.com", "date": "2024-01-25", "time": "14:30"}}
]

DOCUMENT:
{}

JSON OUTPUT:"#,
        text
    )
}

/// Name and email of the CV owner
pub fn build_cv_prompt(document_text: &str) -> String {
    let excerpt: String = document_text.chars().take(2000).collect();
    format!(
        r#"Extract personal information from this CV/resume.

Return ONLY a JSON object (use null for missing information):
{{"name": "full name or null", "email": "email address or null"}}

DOCUMENT:
{}

JSON OUTPUT:"#,
        excerpt
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON value."#,
        invalid_json
    )
}
