//! Prompts sent to the assistant at each step of an audit.

/// First message of a session: the uploaded statement plus instructions.
pub fn initial_analysis(csv: &str) -> String {
    format!(
        "I've uploaded my bank transactions CSV. Please analyze it for recurring subscription charges.\n\
         \n\
         Here are my transactions:\n\
         \n\
         {csv}\n\
         \n\
         Find all recurring charges (subscriptions, memberships, SaaS) and list each one as \
         \"- Name ($amount/period)\". Then ask me about them in batches of 5. For each one I'll \
         answer Cancel, Keep, or Investigate.\n\
         \n\
         Be conversational and helpful, and go one batch at a time.",
        csv = csv.trim_end()
    )
}

/// Asks for the final shareable report as a bare HTML document.
pub const REPORT: &str = "Generate the final HTML audit report now, using the template in the \
skill's assets/template.html file.\n\
\n\
Include:\n\
- Every subscription we discussed, grouped as Cancelled, Investigate, or Keep\n\
- The share card with total savings (yearly and monthly)\n\
- The template's CSS and JavaScript\n\
\n\
Output ONLY the complete HTML document, starting with <!DOCTYPE html>. No markdown code fences, \
no explanation.";
