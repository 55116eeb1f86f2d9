pub const DASHBOARD_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Screenshots</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    min-height: 100vh;
  }
  header {
    padding: 24px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #22c55e;
    animation: pulse 2s infinite;
  }
  header .spacer { flex: 1; }
  @keyframes pulse {
    0%, 100% { opacity: 1; }
    50% { opacity: 0.4; }
  }
  button {
    background: #1a1a2e;
    color: #e0e0e0;
    border: 1px solid #2a2a4e;
    border-radius: 8px;
    padding: 8px 14px;
    font-size: 14px;
    cursor: pointer;
  }
  button:hover { background: #23233d; }
  button.danger { border-color: #7f1d1d; color: #fca5a5; }
  .main { max-width: 1200px; margin: 0 auto; padding: 24px 32px; }
  #summary { font-size: 14px; color: #888; margin-bottom: 16px; }
  #live {
    font-size: 13px;
    color: #a5b4fc;
    margin-bottom: 16px;
    min-height: 18px;
  }
  #grid {
    display: grid;
    grid-template-columns: repeat(auto-fill, minmax(240px, 1fr));
    gap: 16px;
  }
  .card {
    background: #12121c;
    border: 1px solid #1a1a2e;
    border-radius: 8px;
    overflow: hidden;
    cursor: pointer;
    animation: fadeIn 0.2s ease;
  }
  .card img { width: 100%; height: 160px; object-fit: cover; display: block; }
  .card .meta { padding: 10px 12px; font-size: 12px; line-height: 1.5; color: #aaa; }
  .card .name { color: #fff; font-size: 13px; word-break: break-all; }
  @keyframes fadeIn {
    from { opacity: 0; transform: translateY(4px); }
    to { opacity: 1; transform: translateY(0); }
  }
  #modal {
    display: none;
    position: fixed;
    inset: 0;
    background: rgba(0, 0, 0, 0.85);
    align-items: center;
    justify-content: center;
    flex-direction: column;
    gap: 12px;
  }
  #modal.open { display: flex; }
  #modal img { max-width: 92vw; max-height: 85vh; border-radius: 6px; }
  #modal .caption { font-size: 14px; color: #ccc; }
  .empty { color: #666; font-size: 14px; padding: 40px 0; text-align: center; }
</style>
</head>
<body>
<header>
  <div class="dot"></div>
  <h1>Screenshots</h1>
  <div class="spacer"></div>
  <button onclick="load()">Refresh</button>
  <button class="danger" onclick="deleteAll()">Delete all</button>
</header>
<div class="main">
  <div id="summary">Loading...</div>
  <div id="live"></div>
  <div id="grid"></div>
</div>
<div id="modal" onclick="closeModal()">
  <img id="modal-img" alt="">
  <div class="caption" id="modal-caption"></div>
</div>
<script>
  const grid = document.getElementById('grid');
  const summary = document.getElementById('summary');
  const live = document.getElementById('live');

  function escapeHtml(text) {
    const div = document.createElement('div');
    div.textContent = text;
    return div.innerHTML;
  }

  async function load() {
    try {
      const res = await fetch('/screenshots');
      const data = await res.json();
      summary.textContent = data.total + ' screenshot(s)';
      if (data.total === 0) {
        grid.innerHTML = '<div class="empty">No screenshots yet.</div>';
        return;
      }
      grid.innerHTML = data.screenshots.map(s => `
        <div class="card" onclick="openModal('${encodeURIComponent(s.filename)}')">
          <img src="${s.url}" loading="lazy" alt="">
          <div class="meta">
            <div class="name">${escapeHtml(s.filename)}</div>
            <div>${escapeHtml(s.size)} &middot; ${escapeHtml(s.modified)}</div>
          </div>
        </div>`).join('');
    } catch (e) {
      summary.textContent = 'Failed to load screenshots: ' + e;
    }
  }

  async function deleteAll() {
    if (!confirm('Delete every screenshot?')) return;
    const res = await fetch('/screenshots', { method: 'DELETE' });
    const data = await res.json();
    live.textContent = data.message;
    load();
  }

  function openModal(name) {
    const filename = decodeURIComponent(name);
    document.getElementById('modal-img').src = '/screenshots/' + name;
    document.getElementById('modal-caption').textContent = filename;
    document.getElementById('modal').classList.add('open');
  }

  function closeModal() {
    document.getElementById('modal').classList.remove('open');
  }

  document.addEventListener('keydown', e => {
    if (e.key === 'Escape') closeModal();
  });

  const events = new EventSource('/events');
  events.addEventListener('screenshot', e => {
    const record = JSON.parse(e.data);
    const label = record.action ? record.step + ' (' + record.action + ')' : record.step;
    live.textContent = 'Captured ' + record.filename + ' at ' + label;
    load();
  });

  load();
  setInterval(load, 30000);
</script>
</body>
</html>
"##;
